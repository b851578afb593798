//! Helper-process entry point: parse the flags, scrub inherited
//! descriptors, then serve the pipe pair until the parent hangs up.

use std::os::unix::io::RawFd;
use std::process;

use clap::Parser;
use log::{debug, info, warn};
use nix::errno::Errno;

use ioproc::logging;
use ioproc::{Config, Registry, Session};

#[derive(Parser, Debug)]
#[command(name = "ioproc", about = "process to perform risky I/O on behalf of a parent")]
struct Args {
    /// Pipe fd used to receive commands from the parent
    #[clap(long, short = 'r')]
    read_pipe_fd: RawFd,

    /// Pipe fd used to send results back to the parent
    #[clap(long, short = 'w')]
    write_pipe_fd: RawFd,

    /// Max worker threads to be used, 0 for unlimited
    #[clap(long, short = 't', default_value_t = 0)]
    max_threads: usize,

    /// Max requests to be queued, -1 for unlimited
    #[clap(long, short = 'q', default_value_t = -1)]
    max_queued_requests: i64,

    /// Don't close inherited file descriptors when starting
    #[clap(long)]
    keep_fds: bool,

    /// Enable trace debugging
    #[clap(long)]
    trace_enabled: bool,
}

fn validate(args: &Args) -> Result<(), String> {
    if args.read_pipe_fd < 0 || args.write_pipe_fd < 0 {
        return Err("options 'read-pipe-fd' and 'write-pipe-fd' must be valid descriptors".into());
    }
    if args.max_queued_requests >= 0 && args.max_threads == 0 {
        return Err(
            "option 'max-queued-requests' only works when the thread pool has been capped".into(),
        );
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(message) = validate(&args) {
        eprintln!("{message}");
        process::exit(Errno::EINVAL as i32);
    }

    let config = Config {
        read_pipe_fd: args.read_pipe_fd,
        write_pipe_fd: args.write_pipe_fd,
        max_threads: args.max_threads,
        max_queued_requests: args.max_queued_requests,
        keep_fds: args.keep_fds,
        trace_enabled: args.trace_enabled,
    };

    let logger = match logging::init(config.trace_enabled) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("could not start logging: {err}");
            process::exit(Errno::ENOMEM as i32);
        }
    };

    info!("starting ioproc");

    if !config.keep_fds {
        debug!("closing unrelated fds...");
        let keep = [
            libc::STDOUT_FILENO,
            libc::STDERR_FILENO,
            config.read_pipe_fd,
            config.write_pipe_fd,
        ];
        if let Err(errno) = ioproc::startup::close_unrelated_fds(&keep) {
            warn!("could not close unrelated fds: {}", errno.desc());
            logger.shutdown();
            process::exit(errno as i32);
        }
    }

    debug!("opening communication channels...");
    let session = Session::new(&config, Registry::with_standard_ops());
    let status = match session.run() {
        Ok(()) => 0,
        Err(err) => err.raw_os_error().unwrap_or(libc::EIO),
    };

    info!("shutting down ioproc");
    logger.shutdown();
    process::exit(status);
}

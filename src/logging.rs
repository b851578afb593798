//! Log pipeline.
//!
//! Every thread logs through the `log` facade. Records are formatted at the
//! call site into `LEVEL|target|message` lines and pushed on a queue that a
//! single writer thread drains to stderr, so exactly one writer touches the
//! stream and log latency stays off the request paths. The line format is
//! deliberately trivial for the parent to split.

use std::io::{self, Write};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

#[derive(Debug)]
enum LogMsg {
    Line(String),
    Shutdown,
}

struct PipelineLogger {
    sender: Mutex<Sender<LogMsg>>,
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), record.target(), record.args());
        let _ = self.sender.lock().send(LogMsg::Line(line));
    }

    fn flush(&self) {}
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn format_line(level: Level, target: &str, args: &std::fmt::Arguments<'_>) -> String {
    format!("{}|{}|{}\n", level_name(level), target, args)
}

fn writer_main(receiver: &Receiver<LogMsg>) {
    let mut stderr = io::stderr();
    // A shutdown sentinel or a closed channel both end the loop.
    while let Ok(LogMsg::Line(line)) = receiver.recv() {
        if stderr.write_all(line.as_bytes()).is_err() {
            break;
        }
    }
}

/// Handle used to flush and stop the log writer at process exit.
#[derive(Debug)]
pub struct LoggerHandle {
    sender: Sender<LogMsg>,
    writer: Option<JoinHandle<()>>,
}

impl LoggerHandle {
    /// Flush everything queued so far and retire the writer thread.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(LogMsg::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Install the pipeline logger. Trace-level records are only emitted when
/// `trace_enabled` is set.
pub fn init(trace_enabled: bool) -> io::Result<LoggerHandle> {
    let (sender, receiver) = channel();
    let writer = thread::Builder::new()
        .name("iop-logger".to_string())
        .spawn(move || writer_main(&receiver))?;

    let logger = PipelineLogger {
        sender: Mutex::new(sender.clone()),
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|err| io::Error::new(io::ErrorKind::AlreadyExists, err.to_string()))?;
    log::set_max_level(if trace_enabled {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    });

    Ok(LoggerHandle {
        sender,
        writer: Some(writer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_pipe_separated() {
        assert_eq!(
            format_line(Level::Warn, "ioproc::pool", &format_args!("queue full ({})", 3)),
            "WARNING|ioproc::pool|queue full (3)\n"
        );
        assert_eq!(
            format_line(Level::Info, "ioproc", &format_args!("starting")),
            "INFO|ioproc|starting\n"
        );
    }

    #[test]
    fn level_names_match_the_wire_format() {
        assert_eq!(level_name(Level::Error), "ERROR");
        assert_eq!(level_name(Level::Warn), "WARNING");
        assert_eq!(level_name(Level::Info), "INFO");
        assert_eq!(level_name(Level::Debug), "DEBUG");
        assert_eq!(level_name(Level::Trace), "TRACE");
    }
}

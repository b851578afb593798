//! Startup fd hygiene, exercised in its own process: the close sweep is
//! destructive to every descriptor the process owns, so it cannot share a
//! test binary with tests that keep pipes and temp files open.

use std::os::unix::io::RawFd;

use ioproc::startup::close_unrelated_fds;

fn open_fds() -> Vec<RawFd> {
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| entry.unwrap().file_name().to_string_lossy().parse().ok())
        .collect()
}

fn is_open(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[test]
fn closes_only_what_is_not_whitelisted() {
    let victim = unsafe { libc::dup(2) };
    assert!(victim >= 0);
    let survivor = unsafe { libc::dup(2) };
    assert!(survivor >= 0);

    // Whitelist everything currently open except the victim, so the test
    // process keeps its own plumbing.
    let keep: Vec<RawFd> = open_fds().into_iter().filter(|fd| *fd != victim).collect();

    close_unrelated_fds(&keep).unwrap();

    assert!(!is_open(victim));
    assert!(is_open(survivor));
    unsafe { libc::close(survivor) };

    // Running it again over the same whitelist is a no-op.
    close_unrelated_fds(&keep).unwrap();
}

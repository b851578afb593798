//! Process startup hygiene.
//!
//! The helper is forked from a large parent and inherits whatever
//! descriptors were open there. Everything except the pipes and the
//! standard streams is closed before the pipeline starts.

use std::fs;
use std::os::unix::io::RawFd;

use log::{trace, warn};
use nix::errno::Errno;

use crate::error::io_errno;

/// Close every inherited descriptor not present in `keep`.
///
/// `/proc/self/fd` is snapshotted before anything is closed, so the
/// enumeration handle never disappears mid-iteration; by the time the close
/// loop runs, that handle is already gone and its entry reports `EBADF`,
/// which is tolerated like any other already-closed descriptor.
pub fn close_unrelated_fds(keep: &[RawFd]) -> Result<(), Errno> {
    let mut fds = Vec::new();
    let entries = fs::read_dir("/proc/self/fd").map_err(|err| {
        warn!("could not open /proc/self/fd: {err}");
        io_errno(&err)
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| io_errno(&err))?;
        let name = entry.file_name();
        match name.to_string_lossy().parse::<RawFd>() {
            Ok(fd) => fds.push(fd),
            Err(_) => warn!(
                "file '{}' is not an fd representation",
                name.to_string_lossy()
            ),
        }
    }

    for fd in fds {
        if keep.contains(&fd) {
            trace!("not closing fd {fd}: whitelisted");
            continue;
        }
        trace!("closing unrelated fd {fd}");
        if unsafe { libc::close(fd) } < 0 {
            let errno = Errno::last();
            if errno == Errno::EBADF {
                continue;
            }
            warn!("could not close fd {fd}: {}", errno.desc());
            return Err(errno);
        }
    }
    Ok(())
}

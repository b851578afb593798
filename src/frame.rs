//! Pipe transport.
//!
//! Length-prefixed frame transport over the two pipes shared with the
//! parent: an 8-byte little-endian length followed by exactly that many
//! bytes of payload. The codec never inspects the payload; JSON handling
//! lives upstream.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use libc::{c_void, size_t};
use log::warn;
use nix::errno::Errno;

use crate::error::io_errno;

/// Largest inbound frame accepted before the stream is declared garbage.
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// A pipe end shared between threads.
///
/// Closing is idempotent: the dispatcher and the writer may both shut the
/// inbound pipe down without racing each other.
#[derive(Debug)]
pub struct PipeFd {
    fd: RawFd,
    closed: AtomicBool,
}

impl PipeFd {
    /// Take ownership of a raw descriptor.
    pub fn new(fd: RawFd) -> Self {
        PipeFd {
            fd,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying descriptor number.
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Close the descriptor at most once.
    pub fn close(&self) {
        let already_closed = self.closed.swap(true, Ordering::SeqCst);
        if !already_closed {
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let rc =
            unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, buf.len() as size_t) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let rc =
            unsafe { libc::write(self.fd, buf.as_ptr() as *const c_void, buf.len() as size_t) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }
}

impl Drop for PipeFd {
    fn drop(&mut self) {
        self.close()
    }
}

/// Transport failure on one of the pipes.
#[derive(Debug)]
pub enum FrameError {
    /// The length prefix announced a payload beyond the inbound cap.
    TooLarge {
        /// Announced payload length.
        len: u64,
        /// The enforced cap.
        max: u64,
    },
    /// Underlying pipe I/O failed.
    Io(io::Error),
}

impl FrameError {
    /// The errno this failure is reported as.
    pub fn errno(&self) -> Errno {
        match self {
            FrameError::TooLarge { .. } => Errno::EINVAL,
            FrameError::Io(err) => io_errno(err),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds the {max} byte cap")
            }
            FrameError::Io(err) => write!(f, "pipe I/O error: {err}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(err) => Some(err),
            FrameError::TooLarge { .. } => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Io(err)
    }
}

fn retryable(err: &io::Error) -> bool {
    matches!(io_errno(err), Errno::EINTR | Errno::EAGAIN)
}

/// Fill `buf` completely, retrying interrupted and short reads.
///
/// `Ok(false)` means the peer closed the pipe before the buffer was full.
fn read_full(pipe: &PipeFd, buf: &mut [u8]) -> Result<bool, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if retryable(&err) => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(true)
}

fn write_full(pipe: &PipeFd, buf: &[u8]) -> Result<(), FrameError> {
    let mut written = 0;
    while written < buf.len() {
        match pipe.write(&buf[written..]) {
            Ok(0) => {
                return Err(FrameError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "pipe accepted no bytes",
                )));
            }
            Ok(n) => written += n,
            Err(err) if retryable(&err) => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}

/// Read one frame. `Ok(None)` is clean EOF.
pub fn read_frame(pipe: &PipeFd) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0u8; 8];
    if !read_full(pipe, &mut prefix)? {
        return Ok(None);
    }

    let len = u64::from_le_bytes(prefix);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len as usize];
    if !read_full(pipe, &mut payload)? {
        warn!("pipe closed inside a {len} byte frame");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Write the 8-byte prefix followed by the payload, looping partial writes.
pub fn write_frame(pipe: &PipeFd, payload: &[u8]) -> Result<(), FrameError> {
    let prefix = (payload.len() as u64).to_le_bytes();
    write_full(pipe, &prefix)?;
    write_full(pipe, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (PipeFd, PipeFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (PipeFd::new(fds[0]), PipeFd::new(fds[1]))
    }

    #[test]
    fn frames_round_trip() {
        let (rx, tx) = pipe_pair();
        write_frame(&tx, b"{\"id\": 1}").unwrap();
        write_frame(&tx, b"").unwrap();
        assert_eq!(read_frame(&rx).unwrap().unwrap(), b"{\"id\": 1}");
        assert_eq!(read_frame(&rx).unwrap().unwrap(), b"");
    }

    #[test]
    fn closed_write_end_is_clean_eof() {
        let (rx, tx) = pipe_pair();
        write_frame(&tx, b"last").unwrap();
        tx.close();
        assert_eq!(read_frame(&rx).unwrap().unwrap(), b"last");
        assert!(read_frame(&rx).unwrap().is_none());
    }

    #[test]
    fn eof_inside_a_frame_is_reported_as_eof() {
        let (rx, tx) = pipe_pair();
        // Announce 32 bytes but deliver only 4.
        write_full(&tx, &32u64.to_le_bytes()).unwrap();
        write_full(&tx, b"oops").unwrap();
        tx.close();
        assert!(read_frame(&rx).unwrap().is_none());
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let (rx, tx) = pipe_pair();
        write_full(&tx, &(MAX_FRAME_SIZE + 1).to_le_bytes()).unwrap();
        match read_frame(&rx) {
            Err(FrameError::TooLarge { len, .. }) => assert_eq!(len, MAX_FRAME_SIZE + 1),
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn close_is_idempotent() {
        let (rx, tx) = pipe_pair();
        rx.close();
        rx.close();
        tx.close();
    }
}

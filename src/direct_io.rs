//! Direct I/O engine.
//!
//! Aligned buffers, the block-size probe, and the aligned read/write paths
//! behind `readfile`, `writefile` and `probe_block_size`.
//!
//! Since Linux 2.6.0 alignment to the logical block size of the underlying
//! storage (typically 512 bytes) suffices for direct I/O, but that size
//! cannot be queried through NFS, so a 4096-byte alignment is used
//! everywhere as the safe choice.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fmt;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::slice;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use log::warn;
use nix::errno::Errno;
use uuid::Uuid;

use crate::error::OpError;
use crate::sys;

/// Buffer alignment that is safe for direct I/O on any backing store.
pub const SAFE_ALIGN: usize = 4096;

/// Candidate block sizes for the probe, smallest first.
const PROBE_SIZES: [usize; 3] = [1, 512, 4096];

const DEFAULT_FILE_MODE: libc::mode_t = 0o664;

/// Heap buffer aligned for `O_DIRECT` transfers.
pub struct AlignedBuf {
    ptr: *mut u8,
    len: usize,
    layout: Layout,
}

impl AlignedBuf {
    /// A zero-filled buffer of `len` bytes aligned to [`SAFE_ALIGN`].
    pub fn zeroed(len: usize) -> Result<Self, OpError> {
        let layout = Layout::from_size_align(len.max(1), SAFE_ALIGN)
            .map_err(|_| OpError::from_errno(Errno::ENOMEM))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(OpError::from_errno(Errno::ENOMEM));
        }
        Ok(AlignedBuf { ptr, len, layout })
    }

    /// The buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// The buffer contents, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

// The buffer is plain owned memory.
unsafe impl Send for AlignedBuf {}

/// Probe file that is always deleted, even when probing fails.
struct ProbeFile {
    path: String,
    fd: std::os::fd::OwnedFd,
}

impl Drop for ProbeFile {
    fn drop(&mut self) {
        if let Err(errno) = sys::unlink(&self.path) {
            warn!(
                "failed to delete probe file '{}': {}",
                self.path,
                errno.desc()
            );
        }
    }
}

/// Smallest write size the filesystem under `dir` accepts for
/// `O_DIRECT | O_DSYNC` writes.
///
/// `O_DSYNC` is required to enforce strict direct I/O if Gluster is
/// configured without `performance.strict-o-direct`. A filesystem that
/// refuses every candidate size does not support direct I/O at all; that is
/// reported as `EINVAL`.
pub fn probe_block_size(dir: &str) -> Result<usize, OpError> {
    let path = format!("{}/.probe-{}", dir, Uuid::new_v4());
    let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL | libc::O_DIRECT | libc::O_DSYNC;
    let fd = sys::open(&path, flags, 0o600).map_err(|errno| {
        warn!("failed to create probe file '{}': {}", path, errno.desc());
        OpError::from_errno(errno)
    })?;
    let probe = ProbeFile { path, fd };

    let buf = AlignedBuf::zeroed(SAFE_ALIGN)?;
    for size in PROBE_SIZES {
        loop {
            match sys::pwrite(probe.fd.as_raw_fd(), &buf.as_slice()[..size], 0) {
                // Some data was written; this block size is good.
                Ok(_) => return Ok(size),
                Err(Errno::EINTR) => continue,
                // Expected for too-small writes; try the next candidate.
                Err(Errno::EINVAL) => break,
                Err(errno) => {
                    warn!(
                        "failed to write {} bytes to probe file '{}': {}",
                        size,
                        probe.path,
                        errno.desc()
                    );
                    return Err(OpError::from_errno(errno));
                }
            }
        }
    }

    // All sizes failed, O_DIRECT is not supported.
    Err(OpError::from_errno(Errno::EINVAL))
}

fn write_all(fd: RawFd, buf: &[u8]) -> Result<(), OpError> {
    let mut written = 0;
    while written < buf.len() {
        match sys::write(fd, &buf[written..]) {
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
    Ok(())
}

/// Decode the base64 payload into `path`, optionally via direct I/O, and
/// fsync.
///
/// The direct path copies the payload into a fresh aligned buffer and writes
/// it unpadded; the filesystem must accept the short final write under
/// `O_DIRECT` when the length is not a multiple of the device block size.
pub fn write_file(path: &str, data: &str, direct: bool) -> Result<(), OpError> {
    let mut flags = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;
    if direct {
        flags |= libc::O_DIRECT;
    }
    let fd = sys::open(path, flags, DEFAULT_FILE_MODE)?;

    let payload = STANDARD
        .decode(data)
        .map_err(|err| OpError::invalid(format!("arg 'data' is not valid base64: {err}")))?;

    if direct {
        let mut buf = AlignedBuf::zeroed(payload.len())?;
        buf.as_mut_slice().copy_from_slice(&payload);
        write_all(fd.as_raw_fd(), buf.as_slice())?;
    } else {
        write_all(fd.as_raw_fd(), &payload)?;
    }

    sys::fsync(fd.as_raw_fd()).map_err(OpError::from)
}

/// Read `path` into a base64 string, optionally via direct I/O.
///
/// The read loop is bounded by the fstat-reported size, not by "read
/// returned 0": with `O_DIRECT` on a file that is not block-aligned the
/// final read is short and the next one would fail with `EINVAL`.
pub fn read_file(path: &str, direct: bool) -> Result<String, OpError> {
    let mut flags = libc::O_RDONLY;
    if direct {
        flags |= libc::O_DIRECT;
    }
    let fd = sys::open(path, flags, 0)?;

    let st = sys::fstat(fd.as_raw_fd())?;
    let svfs = sys::fstatvfs(fd.as_raw_fd())?;
    let mut buf = AlignedBuf::zeroed(svfs.f_bsize as usize)?;

    let file_size = st.st_size.max(0) as u64;
    let capacity = (file_size as usize / 3 + 1) * 4 + 4;
    let mut encoder = EncoderWriter::new(Vec::with_capacity(capacity), &STANDARD);

    let mut total: u64 = 0;
    while total < file_size {
        let count = match sys::read(fd.as_raw_fd(), buf.as_mut_slice()) {
            Ok(count) => count,
            Err(Errno::EINTR) => continue,
            // The partially encoded output is discarded with the encoder.
            Err(errno) => return Err(errno.into()),
        };
        if count == 0 {
            // File shrank under us; return what it holds now.
            break;
        }
        total += count as u64;
        encoder.write_all(&buf.as_slice()[..count])?;
    }

    let encoded = encoder.finish()?;
    Ok(String::from_utf8_lossy(&encoded).into_owned())
}

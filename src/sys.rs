//! Thin wrappers over the raw syscalls the handlers need.
//!
//! Everything here returns `Result<_, Errno>`; callers attach whatever
//! context the response needs. Paths containing interior NUL bytes are
//! rejected as `EINVAL` before reaching the kernel.

#![allow(missing_docs)]

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use libc::c_void;
use nix::errno::Errno;

fn cpath(path: &str) -> Result<CString, Errno> {
    CString::new(path).map_err(|_| Errno::EINVAL)
}

fn check(rv: libc::c_int) -> Result<(), Errno> {
    if rv < 0 { Err(Errno::last()) } else { Ok(()) }
}

pub fn stat(path: &str) -> Result<libc::stat, Errno> {
    let path = cpath(path)?;
    let mut st = MaybeUninit::<libc::stat>::zeroed();
    check(unsafe { libc::stat(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

pub fn lstat(path: &str) -> Result<libc::stat, Errno> {
    let path = cpath(path)?;
    let mut st = MaybeUninit::<libc::stat>::zeroed();
    check(unsafe { libc::lstat(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

pub fn fstat(fd: RawFd) -> Result<libc::stat, Errno> {
    let mut st = MaybeUninit::<libc::stat>::zeroed();
    check(unsafe { libc::fstat(fd, st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

pub fn statvfs(path: &str) -> Result<libc::statvfs, Errno> {
    let path = cpath(path)?;
    let mut st = MaybeUninit::<libc::statvfs>::zeroed();
    check(unsafe { libc::statvfs(path.as_ptr(), st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

pub fn fstatvfs(fd: RawFd) -> Result<libc::statvfs, Errno> {
    let mut st = MaybeUninit::<libc::statvfs>::zeroed();
    check(unsafe { libc::fstatvfs(fd, st.as_mut_ptr()) })?;
    Ok(unsafe { st.assume_init() })
}

pub fn access(path: &str, mode: libc::c_int) -> Result<(), Errno> {
    let path = cpath(path)?;
    check(unsafe { libc::access(path.as_ptr(), mode) })
}

pub fn rename(oldpath: &str, newpath: &str) -> Result<(), Errno> {
    let oldpath = cpath(oldpath)?;
    let newpath = cpath(newpath)?;
    check(unsafe { libc::rename(oldpath.as_ptr(), newpath.as_ptr()) })
}

pub fn unlink(path: &str) -> Result<(), Errno> {
    let path = cpath(path)?;
    check(unsafe { libc::unlink(path.as_ptr()) })
}

pub fn rmdir(path: &str) -> Result<(), Errno> {
    let path = cpath(path)?;
    check(unsafe { libc::rmdir(path.as_ptr()) })
}

pub fn link(oldpath: &str, newpath: &str) -> Result<(), Errno> {
    let oldpath = cpath(oldpath)?;
    let newpath = cpath(newpath)?;
    check(unsafe { libc::link(oldpath.as_ptr(), newpath.as_ptr()) })
}

pub fn symlink(oldpath: &str, newpath: &str) -> Result<(), Errno> {
    let oldpath = cpath(oldpath)?;
    let newpath = cpath(newpath)?;
    check(unsafe { libc::symlink(oldpath.as_ptr(), newpath.as_ptr()) })
}

pub fn chmod(path: &str, mode: libc::mode_t) -> Result<(), Errno> {
    let path = cpath(path)?;
    check(unsafe { libc::chmod(path.as_ptr(), mode) })
}

pub fn mkdir(path: &str, mode: libc::mode_t) -> Result<(), Errno> {
    let path = cpath(path)?;
    check(unsafe { libc::mkdir(path.as_ptr(), mode) })
}

pub fn open(path: &str, flags: libc::c_int, mode: libc::mode_t) -> Result<OwnedFd, Errno> {
    let path = cpath(path)?;
    let fd = unsafe { libc::open(path.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        Err(Errno::last())
    } else {
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

pub fn ftruncate(fd: RawFd, size: libc::off_t) -> Result<(), Errno> {
    check(unsafe { libc::ftruncate(fd, size) })
}

pub fn fsync(fd: RawFd) -> Result<(), Errno> {
    check(unsafe { libc::fsync(fd) })
}

/// `futimens(fd, NULL)`: set both timestamps to now.
pub fn futimens_now(fd: RawFd) -> Result<(), Errno> {
    check(unsafe { libc::futimens(fd, std::ptr::null()) })
}

pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    let rc = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if rc < 0 { Err(Errno::last()) } else { Ok(rc as usize) }
}

pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
    let rc = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
    if rc < 0 { Err(Errno::last()) } else { Ok(rc as usize) }
}

pub fn pwrite(fd: RawFd, buf: &[u8], offset: libc::off_t) -> Result<usize, Errno> {
    let rc = unsafe { libc::pwrite(fd, buf.as_ptr() as *const c_void, buf.len(), offset) };
    if rc < 0 { Err(Errno::last()) } else { Ok(rc as usize) }
}

/// `glob(3)` over the given pattern. No match is an empty list, allocation
/// failure is `ENOMEM`, a read error during the walk is `EIO`.
pub fn glob(pattern: &str) -> Result<Vec<String>, Errno> {
    let pattern = cpath(pattern)?;
    let mut buf = MaybeUninit::<libc::glob_t>::zeroed();
    let rv = unsafe { libc::glob(pattern.as_ptr(), 0, None, buf.as_mut_ptr()) };
    let mut buf = unsafe { buf.assume_init() };

    let result = match rv {
        0 => {
            let mut matches = Vec::with_capacity(buf.gl_pathc);
            for i in 0..buf.gl_pathc {
                let path = unsafe { CStr::from_ptr(*buf.gl_pathv.add(i)) };
                matches.push(path.to_string_lossy().into_owned());
            }
            Ok(matches)
        }
        libc::GLOB_NOMATCH => Ok(Vec::new()),
        libc::GLOB_NOSPACE => Err(Errno::ENOMEM),
        libc::GLOB_ABORTED => Err(Errno::EIO),
        _ => Err(Errno::EIO),
    };

    unsafe { libc::globfree(&mut buf) };
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn nul_bytes_in_paths_are_einval() {
        assert_eq!(stat("/tmp/\0oops").unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn stat_reports_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"12345").unwrap();
        let st = stat(path.to_str().unwrap()).unwrap();
        assert_eq!(st.st_size, 5);
        assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
    }

    #[test]
    fn open_owns_the_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let fd = open(
            path.to_str().unwrap(),
            libc::O_WRONLY | libc::O_CREAT,
            0o644,
        )
        .unwrap();
        assert_eq!(write(fd.as_raw_fd(), b"x").unwrap(), 1);
        let raw = fd.as_raw_fd();
        drop(fd);
        assert_eq!(fsync(raw).unwrap_err(), Errno::EBADF);
    }

    #[test]
    fn glob_no_match_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.none", dir.path().display());
        assert!(glob(&pattern).unwrap().is_empty());
    }

    #[test]
    fn glob_finds_matches_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), b"").unwrap();
        std::fs::write(dir.path().join("a.log"), b"").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"").unwrap();
        let pattern = format!("{}/*.log", dir.path().display());
        let matches = glob(&pattern).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].ends_with("a.log"));
        assert!(matches[1].ends_with("b.log"));
    }
}

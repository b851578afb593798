//! Path-level filesystem operations.
//!
//! Thin wrappers over the syscalls in [`crate::sys`]. Boolean-returning
//! operations answer `true` on success and report failures as the raw
//! errno. `stat`/`lstat`/`statvfs` expose the raw POSIX field names so the
//! parent can consume them without translation.

use std::os::fd::AsRawFd;

use serde_json::{Value, json};

use crate::error::OpError;
use crate::proto::{arg_bool, arg_i64, arg_str, empty_map};
use crate::sys;

/// Creation mode used when the caller passes mode 0.
const DEFAULT_CREATE_MODE: libc::mode_t = 0o644;

fn stat_map(st: &libc::stat) -> Value {
    json!({
        "st_ino": st.st_ino,
        "st_dev": st.st_dev,
        "st_mode": st.st_mode,
        "st_nlink": st.st_nlink,
        "st_uid": st.st_uid,
        "st_gid": st.st_gid,
        "st_size": st.st_size,
        "st_atime": st.st_atime as f64,
        "st_mtime": st.st_mtime as f64,
        "st_ctime": st.st_ctime as f64,
        "st_blocks": st.st_blocks,
    })
}

/// `stat(2)`.
pub fn stat(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    Ok(stat_map(&sys::stat(path)?))
}

/// `lstat(2)`: like `stat` but does not follow symlinks.
pub fn lstat(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    Ok(stat_map(&sys::lstat(path)?))
}

/// `statvfs(3)` with the raw field names.
pub fn statvfs(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let st = sys::statvfs(path)?;
    Ok(json!({
        "f_bsize": st.f_bsize,
        "f_frsize": st.f_frsize,
        "f_blocks": st.f_blocks,
        "f_bfree": st.f_bfree,
        "f_bavail": st.f_bavail,
        "f_files": st.f_files,
        "f_ffree": st.f_ffree,
        "f_favail": st.f_favail,
        "f_fsid": st.f_fsid,
        "f_flag": st.f_flag,
        "f_namemax": st.f_namemax as f64,
    }))
}

/// `access(2)`, honoring the caller's mode.
pub fn access(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let mode = arg_i64(args, "mode")?;
    sys::access(path, mode as libc::c_int)?;
    Ok(Value::Bool(true))
}

/// `rename(2)`.
pub fn rename(args: &Value) -> Result<Value, OpError> {
    let oldpath = arg_str(args, "oldpath")?;
    let newpath = arg_str(args, "newpath")?;
    sys::rename(oldpath, newpath)?;
    Ok(Value::Bool(true))
}

/// `unlink(2)`.
pub fn unlink(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    sys::unlink(path)?;
    Ok(Value::Bool(true))
}

/// `rmdir(2)`.
pub fn rmdir(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    sys::rmdir(path)?;
    Ok(Value::Bool(true))
}

/// `link(2)`.
pub fn link(args: &Value) -> Result<Value, OpError> {
    let oldpath = arg_str(args, "oldpath")?;
    let newpath = arg_str(args, "newpath")?;
    sys::link(oldpath, newpath)?;
    Ok(Value::Bool(true))
}

/// `symlink(2)`.
pub fn symlink(args: &Value) -> Result<Value, OpError> {
    let oldpath = arg_str(args, "oldpath")?;
    let newpath = arg_str(args, "newpath")?;
    sys::symlink(oldpath, newpath)?;
    Ok(Value::Bool(true))
}

/// `chmod(2)`.
pub fn chmod(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let mode = arg_i64(args, "mode")?;
    sys::chmod(path, mode as libc::mode_t)?;
    Ok(Value::Bool(true))
}

/// `mkdir(2)`.
pub fn mkdir(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let mode = arg_i64(args, "mode")?;
    sys::mkdir(path, mode as libc::mode_t)?;
    Ok(Value::Bool(true))
}

/// Create the file if needed and bump both timestamps to now.
pub fn touch(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let flags = arg_i64(args, "flags")?;
    let mode = arg_i64(args, "mode")?;

    let mode = if mode == 0 {
        DEFAULT_CREATE_MODE
    } else {
        mode as libc::mode_t
    };
    let flags = libc::O_WRONLY | libc::O_CREAT | flags as libc::c_int;

    let fd = sys::open(path, flags, mode)?;
    sys::futimens_now(fd.as_raw_fd())?;
    Ok(Value::Bool(true))
}

/// Create (optionally exclusively) and truncate the file to `size`.
pub fn truncate(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let size = arg_i64(args, "size")?;
    let mode = arg_i64(args, "mode")?;
    let excl = arg_bool(args, "excl")?;

    let mode = if mode == 0 {
        DEFAULT_CREATE_MODE
    } else {
        mode as libc::mode_t
    };
    let mut flags = libc::O_CREAT | libc::O_WRONLY;
    if excl {
        flags |= libc::O_EXCL;
    }

    let fd = sys::open(path, flags, mode)?;
    sys::ftruncate(fd.as_raw_fd(), size as libc::off_t)?;
    Ok(Value::Bool(true))
}

/// Whether the path exists without following a final symlink. Never fails.
pub fn lexists(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    Ok(Value::Bool(sys::lstat(path).is_ok()))
}

/// Directory entries, excluding `.` and `..`.
pub fn listdir(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        names.push(Value::from(entry.file_name().to_string_lossy().into_owned()));
    }
    Ok(Value::Array(names))
}

/// `glob(3)` expansion of the pattern.
pub fn glob(args: &Value) -> Result<Value, OpError> {
    let pattern = arg_str(args, "pattern")?;
    let matches = sys::glob(pattern)?;
    Ok(Value::Array(matches.into_iter().map(Value::from).collect()))
}

/// Open the path read-only and fsync it.
pub fn fsync_path(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let fd = sys::open(path, libc::O_RDONLY, 0)?;
    sys::fsync(fd.as_raw_fd())?;
    Ok(empty_map())
}

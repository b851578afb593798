//! File content operations over the direct-I/O engine.
//!
//! Payloads travel base64-encoded inside JSON strings, because JSON strings
//! don't tolerate arbitrary bytes.

use serde_json::Value;

use crate::direct_io;
use crate::error::OpError;
use crate::proto::{arg_bool, arg_str, empty_map};

/// Read a whole file, returning its contents as a base64 string.
pub fn readfile(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let direct = arg_bool(args, "direct")?;
    Ok(Value::from(direct_io::read_file(path, direct)?))
}

/// Write a base64 payload to a file and fsync it.
pub fn writefile(args: &Value) -> Result<Value, OpError> {
    let path = arg_str(args, "path")?;
    let data = arg_str(args, "data")?;
    let direct = arg_bool(args, "direct")?;
    direct_io::write_file(path, data, direct)?;
    Ok(empty_map())
}

/// Smallest direct-I/O write size the filesystem under `dir` accepts.
pub fn probe_block_size(args: &Value) -> Result<Value, OpError> {
    let dir = arg_str(args, "dir")?;
    Ok(Value::from(direct_io::probe_block_size(dir)? as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    #[test]
    fn writefile_then_readfile_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin").to_str().unwrap().to_string();
        let copy = dir.path().join("copy.bin").to_str().unwrap().to_string();
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
        let encoded = STANDARD.encode(&data);

        assert_eq!(
            writefile(&json!({"path": src, "data": encoded, "direct": false})).unwrap(),
            json!({})
        );
        let read_back = readfile(&json!({"path": src, "direct": false})).unwrap();
        let read_back = read_back.as_str().unwrap();

        writefile(&json!({"path": copy, "data": read_back, "direct": false})).unwrap();
        assert_eq!(std::fs::read(&src).unwrap(), std::fs::read(&copy).unwrap());
        assert_eq!(std::fs::read(&copy).unwrap(), data);
    }

    #[test]
    fn args_must_be_complete() {
        let err = readfile(&json!({"path": "/tmp/x"})).unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);
        assert!(err.message().contains("direct"));

        let err = writefile(&json!({"path": "/tmp/x", "direct": true})).unwrap_err();
        assert!(err.message().contains("data"));

        let err = probe_block_size(&json!({"path": "/tmp"})).unwrap_err();
        assert!(err.message().contains("dir"));
    }
}

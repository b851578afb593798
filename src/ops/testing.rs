//! Testing methods: liveness, latency injection, leak hunting, respawn.

use std::fs;
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::OpError;
use crate::proto::{arg_i64, arg_str};

/// Liveness check.
pub fn ping(_args: &Value) -> Result<Value, OpError> {
    Ok(Value::from("pong"))
}

/// Returns `text` after sleeping `sleep` seconds. Exists to exercise the
/// worker pool with requests of a known duration.
pub fn echo(args: &Value) -> Result<Value, OpError> {
    let text = arg_str(args, "text")?;
    let sleep = arg_i64(args, "sleep")?;
    if sleep > 0 {
        thread::sleep(Duration::from_secs(sleep as u64));
    }
    Ok(Value::from(text))
}

/// Process memory counters in pages, from `/proc/self/statm`. The parent
/// polls this to detect leaks in long-lived helpers.
pub fn memstat(_args: &Value) -> Result<Value, OpError> {
    let statm = fs::read_to_string("/proc/self/statm")?;
    let mut fields = statm.split_whitespace().map(str::parse::<u64>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(size)), Some(Ok(rss)), Some(Ok(shr))) => Ok(json!({
            "size": size,
            "rss": rss,
            "shr": shr,
        })),
        _ => Err(OpError::invalid("bad statm format")),
    }
}

/// Terminates the helper with exit status 1, so the parent can test its
/// respawn path.
pub fn crash(_args: &Value) -> Result<Value, OpError> {
    std::process::exit(1);
}

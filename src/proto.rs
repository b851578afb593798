//! Request and response envelopes.
//!
//! Requests arrive as arbitrary JSON values; the helpers here pull the
//! `id` / `methodName` / `args` fields out without assuming the rest of the
//! shape. Responses are a fixed four-field envelope.

use std::sync::LazyLock;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::OpError;

static EMPTY_ARGS: LazyLock<Value> = LazyLock::new(|| Value::Object(Map::new()));

/// Outbound envelope: `errcode` 0 with `errstr` `"SUCCESS"` unless the
/// operation failed, and a `result` that is an empty map when the operation
/// has nothing meaningful to return.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Echo of the request's correlation id, `-1` if it could not be read.
    pub id: i64,
    /// 0 on success, otherwise an errno or protocol error code.
    pub errcode: i32,
    /// Human-readable outcome description.
    pub errstr: String,
    /// Handler-returned value.
    pub result: Value,
}

impl Response {
    /// A successful response wrapping the handler's value.
    pub fn success(id: i64, result: Value) -> Self {
        Response {
            id,
            errcode: 0,
            errstr: "SUCCESS".to_string(),
            result,
        }
    }

    /// A failure response; the result is the empty map.
    pub fn failure(id: i64, err: &OpError) -> Self {
        Response {
            id,
            errcode: err.code(),
            errstr: err.message().to_string(),
            result: empty_map(),
        }
    }
}

/// The empty-map result value.
pub fn empty_map() -> Value {
    Value::Object(Map::new())
}

/// Correlation id of a request, `-1` when missing or not an integer.
pub fn request_id(request: &Value) -> i64 {
    request.get("id").and_then(Value::as_i64).unwrap_or(-1)
}

/// The method name of a request.
pub fn method_name(request: &Value) -> Result<&str, OpError> {
    match request.get("methodName") {
        Some(Value::String(name)) => Ok(name),
        Some(_) => Err(OpError::invalid("'methodName' has the wrong type")),
        None => Err(OpError::invalid("request has no 'methodName'")),
    }
}

/// The `args` field of a request, or the empty map when absent.
pub fn request_args(request: &Value) -> &Value {
    request.get("args").unwrap_or(&EMPTY_ARGS)
}

fn lookup<'a>(args: &'a Value, name: &str) -> Result<&'a Value, OpError> {
    let map = args
        .as_object()
        .ok_or_else(|| OpError::invalid("args must be a map"))?;
    map.get(name)
        .ok_or_else(|| OpError::invalid(format!("missing arg '{name}'")))
}

/// A required string argument.
pub fn arg_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, OpError> {
    lookup(args, name)?
        .as_str()
        .ok_or_else(|| OpError::invalid(format!("arg '{name}' has the wrong type")))
}

/// A required integer argument.
pub fn arg_i64(args: &Value, name: &str) -> Result<i64, OpError> {
    lookup(args, name)?
        .as_i64()
        .ok_or_else(|| OpError::invalid(format!("arg '{name}' has the wrong type")))
}

/// A required boolean argument.
pub fn arg_bool(args: &Value, name: &str) -> Result<bool, OpError> {
    lookup(args, name)?
        .as_bool()
        .ok_or_else(|| OpError::invalid(format!("arg '{name}' has the wrong type")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_falls_back_to_minus_one() {
        assert_eq!(request_id(&json!({"id": 7})), 7);
        assert_eq!(request_id(&json!({"id": "7"})), -1);
        assert_eq!(request_id(&json!({})), -1);
    }

    #[test]
    fn method_name_must_be_a_string() {
        assert_eq!(method_name(&json!({"methodName": "stat"})).unwrap(), "stat");
        assert!(method_name(&json!({"methodName": 3})).is_err());
        assert!(method_name(&json!({})).is_err());
    }

    #[test]
    fn absent_args_is_the_empty_map() {
        let req = json!({"id": 1, "methodName": "ping"});
        assert_eq!(request_args(&req), &json!({}));
    }

    #[test]
    fn arg_helpers_report_shape_problems() {
        let args = json!({"path": "/tmp", "mode": 0o755, "direct": false});
        assert_eq!(arg_str(&args, "path").unwrap(), "/tmp");
        assert_eq!(arg_i64(&args, "mode").unwrap(), 0o755);
        assert!(!arg_bool(&args, "direct").unwrap());

        let err = arg_str(&args, "pattern").unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);
        assert!(err.message().contains("pattern"));

        let err = arg_i64(&args, "path").unwrap_err();
        assert!(err.message().contains("wrong type"));

        let err = arg_str(&json!(null), "path").unwrap_err();
        assert_eq!(err.message(), "args must be a map");
    }

    #[test]
    fn responses_serialize_with_the_wire_fields() {
        let resp = Response::success(9, json!("pong"));
        let text = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            text,
            r#"{"id":9,"errcode":0,"errstr":"SUCCESS","result":"pong"}"#
        );

        let resp = Response::failure(-1, &OpError::invalid("request has no 'methodName'"));
        let value: Value = serde_json::from_str(&serde_json::to_string(&resp).unwrap()).unwrap();
        assert_eq!(value["errcode"], json!(libc::EINVAL));
        assert_eq!(value["result"], json!({}));
    }
}

//! Operation registry.
//!
//! Maps method names to handlers. The table is populated once at startup
//! and read-only afterwards; lookup is a plain string match.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::OpError;
use crate::ops;

/// Shared contract of every operation: handler-specific args in, result
/// value or errno-style error out.
pub type Handler = fn(&Value) -> Result<Value, OpError>;

/// Method-name → handler table.
#[derive(Debug)]
pub struct Registry {
    handlers: HashMap<&'static str, Handler>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            handlers: HashMap::new(),
        }
    }

    /// The full production surface plus the testing methods.
    pub fn with_standard_ops() -> Self {
        let mut registry = Registry::new();
        // testing methods
        registry.register("ping", ops::testing::ping);
        registry.register("echo", ops::testing::echo);
        registry.register("memstat", ops::testing::memstat);
        registry.register("crash", ops::testing::crash);
        // filesystem operations
        registry.register("stat", ops::fs::stat);
        registry.register("lstat", ops::fs::lstat);
        registry.register("statvfs", ops::fs::statvfs);
        registry.register("access", ops::fs::access);
        registry.register("rename", ops::fs::rename);
        registry.register("unlink", ops::fs::unlink);
        registry.register("rmdir", ops::fs::rmdir);
        registry.register("link", ops::fs::link);
        registry.register("symlink", ops::fs::symlink);
        registry.register("chmod", ops::fs::chmod);
        registry.register("mkdir", ops::fs::mkdir);
        registry.register("touch", ops::fs::touch);
        registry.register("truncate", ops::fs::truncate);
        registry.register("lexists", ops::fs::lexists);
        registry.register("listdir", ops::fs::listdir);
        registry.register("glob", ops::fs::glob);
        registry.register("fsyncPath", ops::fs::fsync_path);
        registry.register("readfile", ops::rw::readfile);
        registry.register("writefile", ops::rw::writefile);
        registry.register("probe_block_size", ops::rw::probe_block_size);
        registry
    }

    /// Add a handler under the given method name.
    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    /// Resolve a method name; unknown names are `EINVAL` and the message
    /// names the method.
    pub fn lookup(&self, method: &str) -> Result<Handler, OpError> {
        self.handlers
            .get(method)
            .copied()
            .ok_or_else(|| OpError::invalid(format!("no such method '{method}'")))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_methods_resolve() {
        let registry = Registry::with_standard_ops();
        let ping = registry.lookup("ping").unwrap();
        assert_eq!(ping(&json!({})).unwrap(), json!("pong"));
    }

    #[test]
    fn unknown_methods_name_the_method() {
        let registry = Registry::with_standard_ops();
        let err = registry.lookup("nosuch").unwrap_err();
        assert_eq!(err.code(), libc::EINVAL);
        assert!(err.message().contains("nosuch"));
    }
}

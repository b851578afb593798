//! Pipe-driven I/O helper process.
//!
//! `ioproc` runs hazardous filesystem operations on behalf of a controlling
//! parent. The parent spawns the helper with a pair of anonymous pipe file
//! descriptors and exchanges length-prefixed JSON messages over them; if a
//! hung network filesystem (NFS, Gluster) wedges the helper, the parent
//! kills and respawns it without stalling its own event loop.
//!
//! The crate is a library plus a thin binary. A [`Session`] owns the two
//! pipes and the three pipeline threads (reader, dispatcher, writer); the
//! dispatcher feeds a bounded [`pool::WorkerPool`] that runs the handlers
//! registered in a [`Registry`]. The operations themselves live under
//! [`ops`], with the direct-I/O machinery in [`direct_io`].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::os::unix::io::RawFd;

pub use crate::error::OpError;
pub use crate::frame::{FrameError, MAX_FRAME_SIZE, PipeFd, read_frame, write_frame};
pub use crate::proto::Response;
pub use crate::registry::{Handler, Registry};
pub use crate::session::Session;

pub mod direct_io;
mod error;
pub mod frame;
pub mod logging;
pub mod ops;
pub mod pool;
pub mod proto;
pub mod registry;
pub mod session;
pub mod startup;
pub mod sys;

/// Runtime options, read-only after startup; passed by value into every
/// part of the pipeline instead of living as process-wide mutable state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inbound pipe carrying requests from the parent.
    pub read_pipe_fd: RawFd,
    /// Outbound pipe carrying responses to the parent.
    pub write_pipe_fd: RawFd,
    /// Worker-thread cap; 0 means unbounded.
    pub max_threads: usize,
    /// Extra admission credits beyond the thread cap; -1 means unbounded.
    pub max_queued_requests: i64,
    /// Skip closing inherited descriptors at startup.
    pub keep_fds: bool,
    /// Emit trace-level diagnostics.
    pub trace_enabled: bool,
}

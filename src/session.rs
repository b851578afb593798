//! Pipeline session.
//!
//! A session serves exactly one parent over the pipe pair it was handed: a
//! reader thread turns inbound frames into requests, a dispatcher admits
//! them into the worker pool, and a writer serializes responses back out.
//! Shutdown propagates reader → dispatcher → writer through stop sentinels
//! on the two queues; the pipeline itself never touches the filesystem.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info, trace, warn};
use nix::errno::Errno;
use serde_json::Value;

use crate::Config;
use crate::frame::{PipeFd, read_frame, write_frame};
use crate::pool::{self, RequestParams, WorkerPool};
use crate::proto::Response;
use crate::registry::Registry;

/// Message on the request queue.
#[derive(Debug)]
pub enum ReaderMsg {
    /// A parsed inbound request.
    Request(Value),
    /// Shutdown sentinel: no more requests will follow.
    Stop,
}

/// Message on the response queue.
#[derive(Debug)]
pub enum WriterMsg {
    /// A response ready to be serialized.
    Response(Response),
    /// Shutdown sentinel: the pool has been drained.
    Stop,
}

/// One request/response pipeline bound to a pipe pair.
#[derive(Debug)]
pub struct Session {
    registry: Arc<Registry>,
    read_pipe: Arc<PipeFd>,
    write_pipe: Arc<PipeFd>,
    max_threads: usize,
    max_queued: i64,
}

impl Session {
    /// Bind a session to the configured pipe fds. The session owns both
    /// descriptors from here on.
    pub fn new(config: &Config, registry: Registry) -> Self {
        Session {
            registry: Arc::new(registry),
            read_pipe: Arc::new(PipeFd::new(config.read_pipe_fd)),
            write_pipe: Arc::new(PipeFd::new(config.write_pipe_fd)),
            max_threads: config.max_threads,
            max_queued: config.max_queued_requests,
        }
    }

    /// Run the pipeline until the parent closes the inbound pipe (or a
    /// fatal pipe/protocol error), draining all in-flight responses.
    ///
    /// Returns an error only when the pipeline could not be brought up;
    /// runtime failures shut the session down and are reported through the
    /// log, because the parent's respawn policy handles them.
    pub fn run(self) -> io::Result<()> {
        let (request_tx, request_rx) = channel();
        let (response_tx, response_rx) = channel();

        let reader = {
            let read_pipe = Arc::clone(&self.read_pipe);
            thread::Builder::new()
                .name("iop-reader".to_string())
                .spawn(move || reader_main(&read_pipe, &request_tx))?
        };

        let dispatcher = {
            let registry = Arc::clone(&self.registry);
            let read_pipe = Arc::clone(&self.read_pipe);
            let max_threads = self.max_threads;
            let max_queued = self.max_queued;
            thread::Builder::new()
                .name("iop-dispatcher".to_string())
                .spawn(move || {
                    dispatcher_main(
                        registry,
                        &read_pipe,
                        &request_rx,
                        &response_tx,
                        max_threads,
                        max_queued,
                    )
                })?
        };

        let writer = {
            let read_pipe = Arc::clone(&self.read_pipe);
            let write_pipe = Arc::clone(&self.write_pipe);
            thread::Builder::new()
                .name("iop-writer".to_string())
                .spawn(move || writer_main(&read_pipe, &write_pipe, &response_rx))?
        };

        // The reader finishes first on EOF; joining in pipeline order makes
        // sure the writer drains every pending response before the session
        // ends.
        join_stage(reader, "request reader");
        join_stage(dispatcher, "request dispatcher");
        join_stage(writer, "response writer");

        self.read_pipe.close();
        self.write_pipe.close();
        Ok(())
    }
}

fn join_stage(handle: JoinHandle<Result<(), Errno>>, name: &str) {
    match handle.join() {
        Ok(Ok(())) => debug!("{name} finished"),
        Ok(Err(errno)) => warn!("{name} failed: {}", errno.desc()),
        Err(_) => warn!("{name} panicked"),
    }
}

fn printable_prefix(frame: &[u8]) -> Cow<'_, str> {
    const LIMIT: usize = 512;
    String::from_utf8_lossy(&frame[..frame.len().min(LIMIT)])
}

fn reader_main(pipe: &PipeFd, requests: &Sender<ReaderMsg>) -> Result<(), Errno> {
    let result = loop {
        trace!("waiting for next request...");
        let frame = match read_frame(pipe) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("request pipe closed");
                break Ok(());
            }
            Err(err) => {
                warn!("could not read request frame: {err}");
                break Err(err.errno());
            }
        };

        trace!("unmarshaling {} byte message...", frame.len());
        match serde_json::from_slice::<Value>(&frame) {
            Ok(request) => {
                trace!("queuing request...");
                if requests.send(ReaderMsg::Request(request)).is_err() {
                    // Dispatcher is gone; nothing left to serve.
                    break Ok(());
                }
            }
            Err(err) => {
                // The stream is desynchronized now; there is no recovery.
                warn!(
                    "could not parse request '{}': {err}",
                    printable_prefix(&frame)
                );
                break Err(Errno::EINVAL);
            }
        }
    };
    let _ = requests.send(ReaderMsg::Stop);
    result
}

fn dispatcher_main(
    registry: Arc<Registry>,
    read_pipe: &PipeFd,
    requests: &Receiver<ReaderMsg>,
    responses: &Sender<WriterMsg>,
    max_threads: usize,
    max_queued: i64,
) -> Result<(), Errno> {
    let mut pool = WorkerPool::new(registry, max_threads, max_queued);
    let mut result = Ok(());

    loop {
        let request = match requests.recv() {
            Ok(ReaderMsg::Request(request)) => request,
            Ok(ReaderMsg::Stop) | Err(_) => break,
        };

        let params = RequestParams {
            received: Instant::now(),
            request,
            responses: responses.clone(),
        };
        if !pool.try_admit() {
            pool::reject_overloaded(params);
            continue;
        }
        if let Err(err) = pool.submit(params) {
            warn!("could not hand request to the pool: {err}");
            result = Err(crate::error::io_errno(&err));
            break;
        }
    }

    // Initiate shutdown by not accepting any more requests, then flush the
    // pool before letting the writer stop.
    read_pipe.close();
    pool.drain();
    let _ = responses.send(WriterMsg::Stop);
    result
}

fn writer_main(
    read_pipe: &PipeFd,
    write_pipe: &PipeFd,
    responses: &Receiver<WriterMsg>,
) -> Result<(), Errno> {
    let mut result = Ok(());

    loop {
        let response = match responses.recv() {
            Ok(WriterMsg::Response(response)) => response,
            Ok(WriterMsg::Stop) | Err(_) => {
                info!("response writer received stop request, terminating");
                break;
            }
        };

        let body = match serde_json::to_vec(&response) {
            Ok(body) => body,
            Err(err) => {
                warn!("could not serialize response: {err}");
                result = Err(Errno::EINVAL);
                break;
            }
        };

        trace!("sending response sized {}", body.len());
        if let Err(err) = write_frame(write_pipe, &body) {
            warn!("could not write to response pipe: {err}");
            result = Err(err.errno());
            break;
        }
    }

    if result.is_err() {
        // Closing the inbound pipe unblocks the reader.
        read_pipe.close();
    }
    write_pipe.close();
    result
}

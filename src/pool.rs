//! Worker pool.
//!
//! Bounded concurrent execution of request handlers. Admission is gated by
//! an atomic credit counter so that at most `max_threads + max_queued`
//! requests are in flight at once; everything past that is rejected with
//! `EAGAIN` before it ever touches a worker.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, warn};
use nix::errno::Errno;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::error::OpError;
use crate::proto::{self, Response};
use crate::registry::Registry;
use crate::session::WriterMsg;

/// One admitted request travelling through the pool.
#[derive(Debug)]
pub struct RequestParams {
    /// When the dispatcher picked the request up; used to log queueing
    /// latency.
    pub received: Instant,
    /// The raw request value.
    pub request: Value,
    /// Where the response goes.
    pub responses: Sender<WriterMsg>,
}

#[derive(Debug)]
struct PoolShared {
    registry: Arc<Registry>,
    max_threads: usize,
    /// `max_threads + max_queued + 1` admission credits; `None` when
    /// admission is unbounded.
    slots_left: Option<AtomicI64>,
    queue: Mutex<VecDeque<RequestParams>>,
    work_ready: Condvar,
    idle_workers: AtomicUsize,
    shutdown: AtomicBool,
}

/// Pool of worker threads fed from an internal FIFO.
///
/// With `max_threads` 0 the pool is unbounded: a fresh worker is spawned
/// whenever a request arrives and no worker is idle.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    next_worker_id: usize,
}

impl WorkerPool {
    /// A pool running handlers from `registry`, capped at `max_threads`
    /// workers, with `max_queued` extra admission credits (`< 0` disables
    /// the admission bound entirely).
    pub fn new(registry: Arc<Registry>, max_threads: usize, max_queued: i64) -> Self {
        let slots_left =
            (max_queued >= 0).then(|| AtomicI64::new(max_threads as i64 + max_queued + 1));
        WorkerPool {
            shared: Arc::new(PoolShared {
                registry,
                max_threads,
                slots_left,
                queue: Mutex::new(VecDeque::new()),
                work_ready: Condvar::new(),
                idle_workers: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
            workers: Vec::new(),
            next_worker_id: 0,
        }
    }

    /// Take one admission credit. `false` means the pool is saturated and
    /// the request must be rejected without consuming a slot.
    pub fn try_admit(&self) -> bool {
        let Some(slots) = &self.shared.slots_left else {
            return true;
        };
        if slots.fetch_sub(1, Ordering::AcqRel) == 1 {
            // That was the guard credit; put it back and refuse.
            slots.fetch_add(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Hand an admitted request to a worker, spawning one if all existing
    /// workers are busy and the cap allows it.
    pub fn submit(&mut self, params: RequestParams) -> io::Result<()> {
        let under_cap =
            self.shared.max_threads == 0 || self.workers.len() < self.shared.max_threads;
        let none_idle = self.shared.idle_workers.load(Ordering::Acquire) == 0;
        if under_cap && (none_idle || self.workers.is_empty()) {
            self.spawn_worker()?;
        }

        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(params);
        }
        self.shared.work_ready.notify_one();

        if let Some(slots) = &self.shared.slots_left {
            debug!(
                "queuing request (slotsLeft={})",
                slots.load(Ordering::Acquire)
            );
        }
        Ok(())
    }

    fn spawn_worker(&mut self) -> io::Result<()> {
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("iop-worker-{id}"))
            .spawn(move || worker_main(&shared))?;
        self.workers.push(handle);
        debug!("worker {id} started");
        Ok(())
    }

    /// Wait for every queued and in-flight request to finish, then retire
    /// the workers.
    pub fn drain(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            // Taking the lock orders the store against workers deciding to
            // wait, so no worker misses the wakeup.
            let _queue = self.shared.queue.lock();
            self.shared.work_ready.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn worker_main(shared: &PoolShared) {
    loop {
        let params = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(params) = queue.pop_front() {
                    break params;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.idle_workers.fetch_add(1, Ordering::Release);
                shared.work_ready.wait(&mut queue);
                shared.idle_workers.fetch_sub(1, Ordering::Release);
            }
        };
        serve_request(shared, params);
    }
}

/// Run one request to completion and queue its response.
fn serve_request(shared: &PoolShared, params: RequestParams) {
    let RequestParams {
        received,
        request,
        responses,
    } = params;
    let req_id = proto::request_id(&request);

    let response = match proto::method_name(&request) {
        Ok(method) => {
            let started = Instant::now();
            debug!(
                "({req_id}) start request for method '{method}' (waitTime={}us)",
                started.duration_since(received).as_micros()
            );
            let result = run_handler(&shared.registry, method, &request);
            debug!(
                "({req_id}) finished request for method '{method}' (runTime={}us)",
                started.elapsed().as_micros()
            );
            match result {
                Ok(value) => Response::success(req_id, value),
                Err(err) => Response::failure(req_id, &err),
            }
        }
        Err(err) => {
            warn!("({req_id}) could not extract request info: {err}");
            Response::failure(req_id, &err)
        }
    };

    if responses.send(WriterMsg::Response(response)).is_err() {
        warn!("({req_id}) response queue is gone, dropping response");
    }

    if let Some(slots) = &shared.slots_left {
        let left = slots.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("({req_id}) dequeuing request (slotsLeft={left})");
    }
}

fn run_handler(registry: &Registry, method: &str, request: &Value) -> Result<Value, OpError> {
    let handler = registry.lookup(method)?;
    let args = proto::request_args(request);
    match panic::catch_unwind(AssertUnwindSafe(|| handler(args))) {
        Ok(result) => result,
        Err(_) => Err(OpError::new(
            Errno::EIO as i32,
            format!("handler for '{method}' panicked"),
        )),
    }
}

/// Build and queue the `EAGAIN` response for a request that found no
/// admission slot.
pub fn reject_overloaded(params: RequestParams) {
    let req_id = proto::request_id(&params.request);
    warn!("({req_id}) request queue full");
    let err = OpError::from_errno(Errno::EAGAIN);
    let response = Response::failure(req_id, &err);
    if params
        .responses
        .send(WriterMsg::Response(response))
        .is_err()
    {
        warn!("({req_id}) response queue is gone, dropping overflow response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc::{Receiver, channel};
    use std::time::Duration;

    fn recv_response(rx: &Receiver<WriterMsg>, timeout: Duration) -> Response {
        match rx.recv_timeout(timeout).expect("pool response") {
            WriterMsg::Response(response) => response,
            WriterMsg::Stop => panic!("unexpected stop sentinel"),
        }
    }

    fn params(request: Value, responses: &Sender<WriterMsg>) -> RequestParams {
        RequestParams {
            received: Instant::now(),
            request,
            responses: responses.clone(),
        }
    }

    #[test]
    fn runs_a_handler_and_responds() {
        let registry = Arc::new(Registry::with_standard_ops());
        let mut pool = WorkerPool::new(registry, 2, -1);
        let (tx, rx) = channel();

        assert!(pool.try_admit());
        pool.submit(params(
            json!({"id": 7, "methodName": "ping", "args": {}}),
            &tx,
        ))
        .unwrap();

        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.id, 7);
        assert_eq!(response.errcode, 0);
        assert_eq!(response.errstr, "SUCCESS");
        assert_eq!(response.result, json!("pong"));
        pool.drain();
    }

    #[test]
    fn admission_is_bounded_by_threads_plus_queued() {
        let registry = Arc::new(Registry::with_standard_ops());
        // 1 worker + 1 queued: exactly two credits.
        let pool = WorkerPool::new(registry, 1, 1);
        assert!(pool.try_admit());
        assert!(pool.try_admit());
        assert!(!pool.try_admit());
        assert!(!pool.try_admit());
    }

    #[test]
    fn slot_is_returned_after_completion() {
        let registry = Arc::new(Registry::with_standard_ops());
        let mut pool = WorkerPool::new(registry, 1, 0);
        let (tx, rx) = channel();

        assert!(pool.try_admit());
        pool.submit(params(
            json!({"id": 1, "methodName": "echo", "args": {"text": "x", "sleep": 1}}),
            &tx,
        ))
        .unwrap();
        // The slow echo holds the only slot.
        assert!(!pool.try_admit());

        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.id, 1);
        // The worker releases the slot right after queueing the response.
        let deadline = Instant::now() + Duration::from_secs(1);
        while !pool.try_admit() {
            assert!(Instant::now() < deadline, "slot was never returned");
            thread::sleep(Duration::from_millis(10));
        }
        pool.drain();
    }

    #[test]
    fn unknown_methods_are_einval_responses() {
        let registry = Arc::new(Registry::with_standard_ops());
        let mut pool = WorkerPool::new(registry, 1, -1);
        let (tx, rx) = channel();

        pool.submit(params(json!({"id": 13, "methodName": "nosuch"}), &tx))
            .unwrap();
        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.id, 13);
        assert_eq!(response.errcode, libc::EINVAL);
        assert!(response.errstr.contains("nosuch"));
        pool.drain();
    }

    #[test]
    fn requests_without_method_name_still_respond() {
        let registry = Arc::new(Registry::with_standard_ops());
        let mut pool = WorkerPool::new(registry, 1, -1);
        let (tx, rx) = channel();

        pool.submit(params(json!({"id": 21}), &tx)).unwrap();
        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.id, 21);
        assert_eq!(response.errcode, libc::EINVAL);

        pool.submit(params(json!({}), &tx)).unwrap();
        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.id, -1);
        pool.drain();
    }

    #[test]
    fn panicking_handlers_become_eio_responses() {
        fn boom(_args: &Value) -> Result<Value, OpError> {
            panic!("boom");
        }
        let mut registry = Registry::new();
        registry.register("boom", boom);
        registry.register("ping", crate::ops::testing::ping);

        let mut pool = WorkerPool::new(Arc::new(registry), 1, -1);
        let (tx, rx) = channel();

        pool.submit(params(json!({"id": 1, "methodName": "boom"}), &tx))
            .unwrap();
        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.errcode, libc::EIO);
        assert!(response.errstr.contains("panicked"));

        // The worker survives the panic and serves the next request.
        pool.submit(params(json!({"id": 2, "methodName": "ping"}), &tx))
            .unwrap();
        let response = recv_response(&rx, Duration::from_secs(5));
        assert_eq!(response.errcode, 0);
        pool.drain();
    }

    #[test]
    fn reject_overloaded_answers_eagain() {
        let (tx, rx) = channel();
        reject_overloaded(params(json!({"id": 12, "methodName": "echo"}), &tx));
        let response = recv_response(&rx, Duration::from_secs(1));
        assert_eq!(response.id, 12);
        assert_eq!(response.errcode, libc::EAGAIN);
    }

    #[test]
    fn drain_finishes_the_backlog_first() {
        let registry = Arc::new(Registry::with_standard_ops());
        let mut pool = WorkerPool::new(registry, 1, -1);
        let (tx, rx) = channel();

        for id in 0..4 {
            pool.submit(params(
                json!({"id": id, "methodName": "echo", "args": {"text": "t", "sleep": 0}}),
                &tx,
            ))
            .unwrap();
        }
        pool.drain();

        let mut seen = 0;
        while let Ok(WriterMsg::Response(response)) = rx.try_recv() {
            assert_eq!(response.errcode, 0);
            seen += 1;
        }
        assert_eq!(seen, 4);
    }
}

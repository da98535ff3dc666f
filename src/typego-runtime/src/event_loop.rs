//! Single-threaded job queue with a counting semaphore, ported from the
//! Go implementation's `eventloop.EventLoop` (`original_source/eventloop/eventloop.go`).
//!
//! Every job enqueued via [`EventLoop::schedule`] increments the pending-work
//! counter; running the job (regardless of outcome) decrements it. When
//! `auto_stop` is set, the loop stops itself once the counter reaches zero.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Persistent, Value};
use tracing::{debug, warn};

/// A unit of work captured by the event loop. Jobs must not capture
/// non-`Send` state; the loop may run on a thread other than the one that
/// called `schedule`.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Returned by [`EventLoop::shutdown`] when the deadline elapses before the
/// pending-work counter reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimedOut;

struct Inner {
    jobs: Mutex<VecDeque<Job>>,
    not_empty: Condvar,
    pending: AtomicI64,
    running: AtomicBool,
    stopped: AtomicBool,
    auto_stop: AtomicBool,
    on_panic: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
    on_unhandled_rejection: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
}

/// The Event Loop component (spec §4.1). Cloned via the `Arc` wrapper that
/// `EventLoop::new` returns; every clone refers to the same queue.
#[derive(Clone)]
pub struct EventLoop {
    inner: std::sync::Arc<Inner>,
}

impl EventLoop {
    pub fn new(auto_stop: bool) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                jobs: Mutex::new(VecDeque::new()),
                not_empty: Condvar::new(),
                pending: AtomicI64::new(0),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                auto_stop: AtomicBool::new(auto_stop),
                on_panic: Mutex::new(None),
                on_unhandled_rejection: Mutex::new(None),
            }),
        }
    }

    pub fn set_on_panic(&self, f: impl Fn(String) + Send + Sync + 'static) {
        *self.inner.on_panic.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_on_unhandled_rejection(&self, f: impl Fn(String) + Send + Sync + 'static) {
        *self.inner.on_unhandled_rejection.lock().unwrap() = Some(Box::new(f));
    }

    pub fn notify_unhandled_rejection(&self, message: String) {
        if let Some(cb) = self.inner.on_unhandled_rejection.lock().unwrap().as_ref() {
            cb(message);
        }
    }

    /// Thread-safe: callable from any goroutine/thread. Increments the
    /// pending-work counter by one before enqueueing.
    pub fn schedule(&self, job: Job) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        self.inner.jobs.lock().unwrap().push_back(job);
        self.inner.not_empty.notify_one();
    }

    /// Manual counter increment for fire-and-forget async producers
    /// (e.g. a pending `setTimeout`).
    pub fn add(&self, n: i64) {
        self.inner.pending.fetch_add(n, Ordering::SeqCst);
    }

    /// Manual counter decrement, pairing with [`EventLoop::add`].
    pub fn done(&self) {
        let prev = self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        if self.inner.auto_stop.load(Ordering::SeqCst) && prev - 1 <= 0 {
            self.stop();
        }
    }

    pub fn pending(&self) -> i64 {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Runs on the calling thread until [`EventLoop::stop`] is called.
    /// Dequeues jobs in FIFO order; a job that panics is caught, reported
    /// via `on_panic`, and does not stop the loop.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        loop {
            let job = {
                let mut jobs = self.inner.jobs.lock().unwrap();
                loop {
                    if let Some(job) = jobs.pop_front() {
                        break Some(job);
                    }
                    if self.inner.stopped.load(Ordering::SeqCst) {
                        break None;
                    }
                    jobs = self.inner.not_empty.wait(jobs).unwrap();
                }
            };
            let Some(job) = job else { break };

            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                let message = crate::utils::panic_message(&panic);
                warn!(message, "event loop job panicked");
                if let Some(cb) = self.inner.on_panic.lock().unwrap().as_ref() {
                    cb(message);
                }
            }
            self.done();
        }
        self.inner.running.store(false, Ordering::SeqCst);
        debug!("event loop stopped");
    }

    /// Idempotent.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.not_empty.notify_all();
        }
    }

    /// Returns a guest `Promise` plus host-side `resolve`/`reject` closures
    /// that are safe to call from any thread (spec §4.1 `create_promise`):
    /// the pending-work counter is pre-incremented at creation, and calling
    /// either closure schedules a job on this loop that performs the actual
    /// settlement and cancels the pre-reservation — the same
    /// reserve-then-cancel bookkeeping `intrinsics::timers` uses for
    /// sleeping timers, so an unsettled promise keeps the loop alive without
    /// being double-counted once it resolves.
    ///
    /// Used by [`crate::shared_memory`]'s async `lock`/`rlock` (spec §4.5):
    /// the acquisition runs on a spawned host thread outside the VM Lock,
    /// then calls `resolve` to settle the guest-visible promise.
    pub fn create_promise<'js>(
        &self,
        context: Context,
        ctx: Ctx<'js>,
    ) -> rquickjs::Result<(
        rquickjs::Promise<'js>,
        impl FnOnce() + Send + 'static,
        impl FnOnce(String) + Send + 'static,
    )> {
        let (promise, resolve, reject) = rquickjs::Promise::new(&ctx)?;
        self.add(1);

        // SAFETY: same invariant as `intrinsics::concurrency`'s channel
        // values — these are only ever restored against the same `Context`
        // they were saved from, which outlives both closures below (it is
        // owned by the `Engine`).
        let resolve: Persistent<rquickjs::Function<'static>> =
            unsafe { Persistent::save(&ctx, resolve).transmute() };
        let reject: Persistent<rquickjs::Function<'static>> =
            unsafe { Persistent::save(&ctx, reject).transmute() };

        let resolve_loop = self.clone();
        let resolve_context = context.clone();
        let do_resolve = move || {
            resolve_loop.schedule(Box::new(move || {
                resolve_context.with(|ctx| {
                    if let Ok(f) = resolve.restore(&ctx) {
                        let _: rquickjs::Result<Value<'_>> = f.call((true,));
                    }
                });
            }));
            resolve_loop.done();
        };

        let reject_loop = self.clone();
        let do_reject = move |message: String| {
            reject_loop.schedule(Box::new(move || {
                context.with(|ctx| {
                    if let Ok(f) = reject.restore(&ctx) {
                        let _: rquickjs::Result<Value<'_>> = f.call((message,));
                    }
                });
            }));
            reject_loop.done();
        };

        Ok((promise, do_resolve, do_reject))
    }

    /// Waits for the pending-work counter to reach zero or `deadline` to
    /// elapse, then calls [`EventLoop::stop`].
    pub fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownTimedOut> {
        let start = Instant::now();
        while self.pending() > 0 {
            if start.elapsed() >= deadline {
                self.stop();
                return Err(ShutdownTimedOut);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.stop();
        Ok(())
    }
}

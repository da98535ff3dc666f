//! `go`/`makeChan`/`select` (spec §4.4), ported from the Go implementation's
//! `bridge/intrinsics/concurrency.go`. This is where the VM Lock (spec
//! §4.2) is actually taken and released: `go` acquires it on a spawned
//! thread before invoking the guest function; `select` is the sole
//! intrinsic that releases the lock while a goroutine is logically parked
//! waiting on a channel.
//!
//! Channel values cross the thread boundary as `Persistent<Value<'static>>`,
//! the same trick `timers.rs` uses to keep a guest callback alive outside
//! the `Context::with` closure that created it.
//!
//! Rust has no equivalent of Go's `reflect.Select` (a true blocking
//! multi-channel wait). Per `SPEC_FULL.md` §10.4, `select` releases the VM
//! Lock and polls every case with non-blocking operations under a bounded
//! exponential backoff, rather than blocking the host thread indefinitely
//! inside a reflective wait.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rquickjs::class::Trace;
use rquickjs::{Array, Context, Ctx, Function, JsLifetime, Object, Persistent, Value};

use crate::vm_lock::VmLock;

struct ChanInner {
    capacity: usize,
    queue: Mutex<VecDeque<Persistent<Value<'static>>>>,
    closed: Mutex<bool>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl ChanInner {
    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn send(&self, v: Persistent<Value<'static>>) -> Result<(), &'static str> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if self.is_closed() {
                return Err("send on closed channel");
            }
            if self.capacity == 0 || queue.len() < self.capacity {
                queue.push_back(v);
                self.not_empty.notify_one();
                return Ok(());
            }
            queue = self.not_full.wait(queue).unwrap();
        }
    }

    fn recv(&self) -> (Option<Persistent<Value<'static>>>, bool) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(v) = queue.pop_front() {
                self.not_full.notify_one();
                return (Some(v), true);
            }
            if self.is_closed() {
                return (None, false);
            }
            queue = self.not_empty.wait(queue).unwrap();
        }
    }

    fn try_send(&self, v: Persistent<Value<'static>>) -> Option<Result<(), &'static str>> {
        let mut queue = self.queue.lock().unwrap();
        if self.is_closed() {
            return Some(Err("send on closed channel"));
        }
        if self.capacity == 0 || queue.len() < self.capacity {
            queue.push_back(v);
            self.not_empty.notify_one();
            return Some(Ok(()));
        }
        None
    }

    fn try_recv(&self) -> Option<(Option<Persistent<Value<'static>>>, bool)> {
        let mut queue = self.queue.lock().unwrap();
        if let Some(v) = queue.pop_front() {
            self.not_full.notify_one();
            return Some((Some(v), true));
        }
        if self.is_closed() {
            return Some((None, false));
        }
        None
    }
}

/// A buffered FIFO of guest values (spec §3 "Channel"), exposed to guest
/// code as a class with `send`/`recv`/`close` methods.
#[rquickjs::class]
#[derive(Clone, Trace, JsLifetime)]
pub struct Chan {
    #[qjs(skip_trace)]
    inner: Arc<ChanInner>,
}

#[rquickjs::methods]
impl Chan {
    #[qjs(constructor)]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(ChanInner {
                capacity: capacity.unwrap_or(0),
                queue: Mutex::new(VecDeque::new()),
                closed: Mutex::new(false),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Blocks the calling thread, which per the VM Lock rules is normally
    /// still holding it, until there is room or the channel closes. Send on
    /// a closed channel throws.
    pub fn send(&self, ctx: Ctx<'_>, v: Value<'_>) -> rquickjs::Result<()> {
        let persisted: Persistent<Value<'static>> = unsafe { Persistent::save(&ctx, v).transmute() };
        match self.inner.send(persisted) {
            Ok(()) => Ok(()),
            Err(msg) => Err(rquickjs::Exception::throw_type(&ctx, msg)),
        }
    }

    /// Blocks until a value is available or the channel closes. Returns the
    /// bare value (spec §8 S3); a closed, drained channel yields `undefined`,
    /// indistinguishable guest-side from a value explicitly sent as
    /// `undefined` — `select`'s `recv` case callback is the form that
    /// surfaces the `ok` flag (spec §4.4).
    pub fn recv<'js>(&self, ctx: Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        let (v, _ok) = self.inner.recv();
        match v {
            Some(p) => p.restore(&ctx),
            None => Ok(Value::new_undefined(ctx)),
        }
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

/// `go(fn, ...args)`: spawns a host thread that acquires the VM Lock before
/// invoking `fn(args...)`. A panic inside the goroutine is caught and
/// logged, never crossing the thread boundary.
fn go<'js>(
    ctx: Ctx<'js>,
    context: Context,
    vm_lock: Arc<VmLock>,
    func: Function<'js>,
    args: rquickjs::prelude::Rest<Value<'js>>,
) -> rquickjs::Result<()> {
    let func = Persistent::save(&ctx, func);
    let args: Vec<Persistent<Value<'static>>> = args
        .into_inner()
        .into_iter()
        .map(|v| unsafe { Persistent::save(&ctx, v).transmute() })
        .collect();

    std::thread::spawn(move || {
        vm_lock.with_lock(|| {
            context.with(|ctx| {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let Ok(f) = func.clone().restore(&ctx) else {
                        return;
                    };
                    let restored: Vec<Value<'_>> = args
                        .iter()
                        .filter_map(|a| a.clone().restore(&ctx).ok())
                        .collect();
                    let _: rquickjs::Result<Value<'_>> = f.call(rquickjs::prelude::Rest(restored));
                }));
                if let Err(e) = outcome {
                    tracing::warn!(panic = ?e, "panic inside go() goroutine");
                }
            });
        });
    });
    Ok(())
}

/// One `select` case, reflecting spec §4.4's three shapes:
/// `{chan, send: value, case: fn}`, `{chan, recv: fn}`, `{default: fn}`.
enum Case {
    Send {
        chan: Chan,
        value: Persistent<Value<'static>>,
        callback: Option<Persistent<Function<'static>>>,
    },
    Recv {
        chan: Chan,
        callback: Persistent<Function<'static>>,
    },
    Default {
        callback: Persistent<Function<'static>>,
    },
}

fn parse_cases<'js>(ctx: &Ctx<'js>, cases: Array<'js>) -> rquickjs::Result<Vec<Case>> {
    let mut parsed = Vec::with_capacity(cases.len());
    for item in cases.iter::<Object>() {
        let item = item?;
        if let Ok(default_cb) = item.get::<_, Function>("default") {
            parsed.push(Case::Default {
                callback: unsafe { Persistent::save(ctx, default_cb).transmute() },
            });
            continue;
        }
        let chan: Chan = item.get("chan")?;
        if let Ok(cb) = item.get::<_, Function>("recv") {
            parsed.push(Case::Recv {
                chan,
                callback: unsafe { Persistent::save(ctx, cb).transmute() },
            });
            continue;
        }
        let value: Value = item.get("send")?;
        let callback = item.get::<_, Function>("case").ok();
        parsed.push(Case::Send {
            chan,
            value: unsafe { Persistent::save(ctx, value).transmute() },
            callback: callback.map(|cb| unsafe { Persistent::save(ctx, cb).transmute() }),
        });
    }
    Ok(parsed)
}

fn poll_once(cases: &[Case]) -> Option<usize> {
    for (i, case) in cases.iter().enumerate() {
        let ready = match case {
            Case::Send { chan, value, .. } => chan.inner.try_send(value.clone()).is_some(),
            Case::Recv { chan, .. } => chan.inner.try_recv().is_some(),
            Case::Default { .. } => false,
        };
        if ready {
            return Some(i);
        }
    }
    None
}

fn invoke_chosen<'js>(ctx: &Ctx<'js>, cases: &[Case], index: usize) -> rquickjs::Result<()> {
    match &cases[index] {
        Case::Send { callback, .. } => {
            if let Some(cb) = callback {
                let f = cb.clone().restore(ctx)?;
                let _: Value = f.call(())?;
            }
        }
        Case::Recv { chan, callback } => {
            let (v, ok) = chan.inner.try_recv().unwrap_or((None, false));
            let value = match v {
                Some(p) => p.restore(ctx)?,
                None => Value::new_undefined(ctx.clone()),
            };
            let f = callback.clone().restore(ctx)?;
            let _: Value = f.call((value, ok))?;
        }
        Case::Default { callback } => {
            let f = callback.clone().restore(ctx)?;
            let _: Value = f.call(())?;
        }
    }
    Ok(())
}

/// `select(cases)`: releases the VM Lock for the duration of the poll,
/// since this call is itself made from guest code already holding it, then
/// polls every case under bounded backoff, re-acquires the lock, and
/// invokes the chosen case's callback. Returns the chosen case's index.
fn select<'js>(ctx: Ctx<'js>, vm_lock: Arc<VmLock>, cases: Array<'js>) -> rquickjs::Result<i32> {
    let parsed = parse_cases(&ctx, cases)?;
    let default_index = parsed.iter().position(|c| matches!(c, Case::Default { .. }));

    let chosen = vm_lock.release_during(|| {
        let mut backoff = Duration::from_micros(50);
        loop {
            if let Some(i) = poll_once(&parsed) {
                return i;
            }
            if let Some(i) = default_index {
                return i;
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(5));
        }
    });

    invoke_chosen(&ctx, &parsed, chosen)?;
    Ok(chosen as i32)
}

pub fn setup(ctx: &Ctx<'_>, context: Context, vm_lock: Arc<VmLock>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        "makeChan",
        Function::new(ctx.clone(), |capacity: Option<usize>| Chan::new(capacity))?,
    )?;

    let go_context = context.clone();
    let go_lock = vm_lock.clone();
    globals.set(
        "go",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, f: Function<'_>, args: rquickjs::prelude::Rest<Value<'_>>| {
                go(ctx, go_context.clone(), go_lock.clone(), f, args)
            },
        )?,
    )?;

    let select_lock = vm_lock;
    globals.set(
        "select",
        Function::new(ctx.clone(), move |ctx: Ctx<'_>, cases: Array<'_>| {
            select(ctx, select_lock.clone(), cases)
        })?,
    )?;

    Ok(())
}

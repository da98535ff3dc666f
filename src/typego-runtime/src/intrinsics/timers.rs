//! `setTimeout`/`clearTimeout`/`setInterval`/`clearInterval` (spec §4.4),
//! ported from the Go implementation's `bridge/intrinsics/timers.go`. Every
//! callback runs through the Event Loop, holding the VM Lock, exactly like
//! any other job.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rquickjs::{Context, Ctx, Function, Persistent};

use crate::event_loop::EventLoop;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default, Clone)]
struct TimerTable {
    cancelled: Rc<RefCell<HashMap<u64, Arc<AtomicBool>>>>,
}

impl TimerTable {
    fn register(&self, id: u64) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.cancelled.borrow_mut().insert(id, flag.clone());
        flag
    }

    fn cancel(&self, id: u64) {
        if let Some(flag) = self.cancelled.borrow_mut().remove(&id) {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Spawns the sleep (or tick) on a detached host thread; on each fire it
/// reserves the pending-work slot it is about to hand to `schedule`, then
/// releases its own reservation so the counter only ever reflects work that
/// is either sleeping or already enqueued, never double-counted.
fn spawn_timer(
    context: Context,
    event_loop: EventLoop,
    func: Persistent<Function<'static>>,
    delay: Duration,
    repeat: bool,
    cancelled: Arc<AtomicBool>,
) {
    event_loop.add(1);
    std::thread::spawn(move || loop {
        std::thread::sleep(delay);
        if cancelled.load(Ordering::SeqCst) {
            event_loop.done();
            return;
        }
        let context = context.clone();
        let func = func.clone();
        event_loop.schedule(Box::new(move || {
            context.with(|ctx| {
                if let Ok(f) = func.restore(&ctx) {
                    let _ = f.call::<_, ()>(());
                }
            });
        }));
        event_loop.done();
        if !repeat {
            return;
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        event_loop.add(1);
    });
}

pub fn setup(ctx: &Ctx<'_>, context: Context, event_loop: EventLoop) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    let table = TimerTable::default();

    let set_timeout = {
        let context = context.clone();
        let event_loop = event_loop.clone();
        let table = table.clone();
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, cb: Function<'_>, ms: Option<u64>| -> u64 {
                let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
                let cancelled = table.register(id);
                let persisted = Persistent::save(&ctx, cb);
                spawn_timer(
                    context.clone(),
                    event_loop.clone(),
                    persisted,
                    Duration::from_millis(ms.unwrap_or(0)),
                    false,
                    cancelled,
                );
                id
            },
        )?
    };

    let clear_timeout = {
        let table = table.clone();
        Function::new(ctx.clone(), move |id: u64| {
            table.cancel(id);
        })?
    };

    let set_interval = {
        let context = context.clone();
        let event_loop = event_loop.clone();
        let table = table.clone();
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, cb: Function<'_>, ms: Option<u64>| -> u64 {
                let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
                let cancelled = table.register(id);
                let persisted = Persistent::save(&ctx, cb);
                spawn_timer(
                    context.clone(),
                    event_loop.clone(),
                    persisted,
                    Duration::from_millis(ms.unwrap_or(0).max(1)),
                    true,
                    cancelled,
                );
                id
            },
        )?
    };

    let clear_interval = {
        let table = table.clone();
        Function::new(ctx.clone(), move |id: u64| {
            table.cancel(id);
        })?
    };

    globals.set("setTimeout", set_timeout)?;
    globals.set("clearTimeout", clear_timeout)?;
    globals.set("setInterval", set_interval)?;
    globals.set("clearInterval", clear_interval)?;
    Ok(())
}

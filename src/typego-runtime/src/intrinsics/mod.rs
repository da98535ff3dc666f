//! The guest-facing intrinsic surface (spec §4.4), ported module-by-module
//! from the Go implementation's `bridge/intrinsics/*.go`. Each submodule
//! owns one file's worth of globals; [`setup`] installs all of them in one
//! call from [`crate::Engine::new`].

pub mod concurrency;
pub mod encoding;
pub mod io_wrap;
pub mod pointers;
pub mod process;
pub mod scope;
pub mod sizeof;
pub mod slices;
pub mod timers;

use std::sync::Arc;

use rquickjs::{Context, Ctx};

use crate::event_loop::EventLoop;
use crate::vm_lock::VmLock;

/// Installs every intrinsic global onto `ctx`. Called once per `Engine`
/// during construction, after the runtime's module registry has been
/// initialized but before any guest script runs.
pub fn setup(
    ctx: &Ctx<'_>,
    context: Context,
    event_loop: EventLoop,
    vm_lock: Arc<VmLock>,
    argv: &[String],
    stats: impl Fn() -> (u64, u64, u64) + 'static,
) -> rquickjs::Result<()> {
    scope::setup(ctx)?;
    pointers::setup(ctx)?;
    slices::setup(ctx)?;
    sizeof::setup(ctx, stats)?;
    timers::setup(ctx, context.clone(), event_loop)?;
    process::setup(ctx, argv)?;
    encoding::setup(ctx)?;
    concurrency::setup(ctx, context.clone(), vm_lock.clone())?;
    io_wrap::setup(ctx, context, vm_lock)?;
    Ok(())
}

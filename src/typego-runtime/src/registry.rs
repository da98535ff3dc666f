//! Process-wide Module Registry (spec §4/§6), ported from the Go
//! implementation's `bridge/core/registry.go`: a package-level slice of
//! `Module`s, appended to at process init, installed in registration order
//! into every new `Engine`.

use std::sync::{Arc, OnceLock};
use std::sync::Mutex;

use rquickjs::Ctx;

use crate::event_loop::EventLoop;

/// A named, self-installing collection of guest globals produced by a host
/// library (console, crypto, io, require, ...). `{name, install(runtime,
/// event_loop)}` per spec §3.
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn install(&self, ctx: &Ctx<'_>, event_loop: &EventLoop) -> anyhow::Result<()>;
}

fn registry() -> &'static Mutex<Vec<Arc<dyn Module>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Arc<dyn Module>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Append-only after program startup, matching spec §5's "shared-resource
/// policy" for the registry.
pub fn register_module(module: Arc<dyn Module>) {
    registry().lock().unwrap().push(module);
}

pub fn registered_modules() -> Vec<Arc<dyn Module>> {
    registry().lock().unwrap().clone()
}

/// Invokes every registered module's `install` in registration order. Called
/// once per `Engine` during `Engine::new`.
pub fn init_all(ctx: &Ctx<'_>, event_loop: &EventLoop) -> anyhow::Result<()> {
    for module in registered_modules() {
        module.install(ctx, event_loop)?;
    }
    Ok(())
}

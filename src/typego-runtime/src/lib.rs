pub mod ast_transform;
pub mod error;
pub mod event_loop;
mod globals;
pub mod host;
mod host_fn;
pub mod intrinsics;
mod modules;
pub mod reflection;
pub mod registry;
pub mod shared_memory;
pub(crate) mod utils;
pub mod vm_lock;
pub mod worker;

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use rquickjs::loader::{Loader, Resolver};
use rquickjs::{CatchResultExt, Context, Ctx, Module, Result as JsResult, Runtime, Value};
use tracing::instrument;

pub use error::{EngineError, Result as EngineResult};
pub use event_loop::EventLoop;
pub use shared_memory::MemoryFactory;
pub use vm_lock::VmLock;
pub use worker::Worker;

use crate::host::Host;
use crate::host_fn::HostModuleLoader;
use crate::modules::memory::MemoryContext;
use crate::modules::NativeModuleLoader;

/// The Engine (spec §3/§6): owns one [`Runtime`]/[`Context`] pair, one
/// [`EventLoop`], one [`MemoryFactory`], the [`VmLock`] serializing entry
/// into the runtime, an optional soft memory cap enforced by a background
/// watchdog, an optional error callback, and a cancellation flag.
pub struct Engine {
    context: Context,
    runtime: Runtime,
    event_loop: EventLoop,
    vm_lock: Arc<VmLock>,
    memory_factory: Arc<MemoryFactory>,
    cancelled: Arc<AtomicBool>,
    on_error: Arc<Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>>,
    gc_cycles: Arc<AtomicU64>,
}

// SAFETY: same invariant the teacher's `JsRuntime` documented — `Context` is
// not `Send` only because it holds a raw pointer, and every public method on
// `Engine` that touches it goes through `VmLock`, so there is never
// concurrent reentry. rquickjs's own "parallel" feature implements `Send`
// for `Context` under the same reasoning.
unsafe impl Send for Engine {}

impl Engine {
    /// `new_engine(memory_limit_bytes, optional shared_memory_factory)`
    /// (spec §6). Installs the module loader, the Module Registry, globals,
    /// and every intrinsic before returning.
    #[instrument(skip_all, level = "info")]
    pub fn new<H: Host + 'static>(
        host: H,
        memory_limit_bytes: Option<u64>,
        memory_factory: Option<Arc<MemoryFactory>>,
    ) -> anyhow::Result<Self> {
        let runtime = Runtime::new().context("unable to initialize the QuickJS runtime")?;
        let context = Context::full(&runtime).context("unable to create JS context")?;

        let event_loop = EventLoop::new(false);
        let vm_lock = Arc::new(VmLock::new());
        let memory_factory = memory_factory.unwrap_or_else(MemoryFactory::new);
        let gc_cycles = Arc::new(AtomicU64::new(0));

        let host_loader = HostModuleLoader::default();
        let native_loader = NativeModuleLoader;
        let module_loader = ModuleLoader::new(host);

        let loader = (host_loader.clone(), native_loader, module_loader);
        runtime.set_loader(loader.clone(), loader);

        let argv: Vec<String> = std::env::args().collect();

        context.with(|ctx| -> anyhow::Result<()> {
            host_loader.install(&ctx)?;

            let Ok(None) = ctx.store_userdata(MemoryContext {
                factory: memory_factory.clone(),
                event_loop: event_loop.clone(),
                context: context.clone(),
                vm_lock: vm_lock.clone(),
            }) else {
                return Err(anyhow!("MemoryContext already installed in this context"));
            };

            globals::setup(&ctx).catch(&ctx)?;
            registry::init_all(&ctx, &event_loop).catch(&ctx)?;

            let stats_gc = gc_cycles.clone();
            intrinsics::setup(
                &ctx,
                context.clone(),
                event_loop.clone(),
                vm_lock.clone(),
                &argv,
                move || {
                    let resident = resident_set_bytes();
                    (resident, resident, stats_gc.load(Ordering::Relaxed))
                },
            )
            .catch(&ctx)?;

            Ok(())
        })?;

        let cancelled = Arc::new(AtomicBool::new(false));
        runtime.set_interrupt_handler(Some(Box::new({
            let cancelled = cancelled.clone();
            move || cancelled.load(Ordering::SeqCst)
        })));

        let engine = Self {
            context,
            runtime,
            event_loop,
            vm_lock,
            memory_factory,
            cancelled,
            on_error: Arc::new(Mutex::new(None)),
            gc_cycles,
        };

        if let Some(cap) = memory_limit_bytes {
            engine.start_memory_watchdog(cap);
        }

        Ok(engine)
    }

    /// `Engine.run(script_text)` (spec §6): acquires the VM Lock, evaluates
    /// `script_text` as a module (so `import` works against the Module
    /// Registry's native modules), resolves the module's top-level await if
    /// any, and returns its `default` export's JSON form, or `"null"` if the
    /// module does not export one under that name.
    pub fn run(&self, script_text: &str) -> EngineResult<String> {
        let result = self.vm_lock.with_lock(|| {
            self.context.with(|ctx| -> anyhow::Result<String> {
                let module = Module::declare(ctx.clone(), "<entry>", script_text.to_string()).catch(&ctx)?;
                let (module, promise) = module.eval().catch(&ctx)?;
                promise.finish::<()>().catch(&ctx)?;

                let value: Value = module.get("default").unwrap_or(Value::new_undefined(ctx.clone()));

                ctx.json_stringify(value)
                    .catch(&ctx)?
                    .map(|s| s.to_string())
                    .transpose()
                    .catch(&ctx)
                    .map(|s| s.unwrap_or_else(|| "null".to_string()))
            })
        });
        result.map_err(|e| EngineError::GuestThrow(format!("{e:#?}")))
    }

    /// `Engine.run_safe(script_text)` (spec §6): as [`Engine::run`], but a
    /// host panic while servicing the call is caught and reported through
    /// [`Engine::on_error`] rather than unwinding into the caller.
    pub fn run_safe(&self, script_text: &str) -> EngineResult<String> {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.run(script_text))) {
            Ok(result) => result,
            Err(panic) => {
                let message = utils::panic_message(&panic);
                self.report_error(format!("host panic: {message}"));
                Err(EngineError::HostPanic(message))
            }
        }
    }

    /// `Engine.bind(name, value)` (spec §4.3/§6): installs a reflected
    /// binding via [`reflection::Bound`].
    pub fn bind<T>(&self, name: &str, bound: reflection::Bound<T>) -> EngineResult<()>
    where
        T: serde::Serialize + 'static,
    {
        let result: anyhow::Result<()> = self.vm_lock.with_lock(|| {
            self.context.with(|ctx| {
                let obj = bound.install(&ctx).catch(&ctx)?;
                ctx.globals().set(name, obj).catch(&ctx)?;
                Ok(())
            })
        });
        result.map_err(|e| EngineError::TypeError(format!("{e:#?}")))
    }

    /// `Engine.global_set(name, value)` (spec §6): raw global assignment of
    /// any serializable host value, via a JSON round trip.
    pub fn global_set<T: serde::Serialize>(&self, name: &str, value: T) -> EngineResult<()> {
        let json = serde_json::to_string(&value).map_err(|e| EngineError::TypeError(e.to_string()))?;
        let result: anyhow::Result<()> = self.vm_lock.with_lock(|| {
            self.context.with(|ctx| {
                let v = ctx.json_parse(json).catch(&ctx)?;
                ctx.globals().set(name, v).catch(&ctx)
            })
        });
        result.map_err(|e| EngineError::TypeError(format!("{e:#?}")))
    }

    /// `Engine.on_error(fn)` (spec §6): registered callback for host panics
    /// (via [`Engine::run_safe`]) and unhandled promise rejections.
    pub fn on_error(&self, f: impl Fn(String) + Send + Sync + 'static) {
        *self.on_error.lock().unwrap() = Some(Box::new(f));
        let on_error = self.on_error.clone();
        self.event_loop
            .set_on_unhandled_rejection(move |message| {
                if let Some(cb) = on_error.lock().unwrap().as_ref() {
                    cb(format!("unhandled promise rejection: {message}"));
                }
            });
        let on_panic = self.on_error.clone();
        self.event_loop.set_on_panic(move |message| {
            if let Some(cb) = on_panic.lock().unwrap().as_ref() {
                cb(format!("host panic in bridge: {message}"));
            }
        });
    }

    fn report_error(&self, message: String) {
        if let Some(cb) = self.on_error.lock().unwrap().as_ref() {
            cb(message);
        }
    }

    /// `Engine.context()` (spec §6): the underlying [`Context`], for callers
    /// that need direct access (e.g. the Worker Subsystem's message pump).
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn memory_factory(&self) -> &Arc<MemoryFactory> {
        &self.memory_factory
    }

    pub fn vm_lock(&self) -> &Arc<VmLock> {
        &self.vm_lock
    }

    /// Runs a full garbage collection cycle, under the VM Lock.
    pub fn run_gc(&self) {
        self.vm_lock.with_lock(|| {
            self.runtime.run_gc();
        });
        self.gc_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Fires the cancellation handle and stops the Event Loop. Idempotent.
    pub fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.event_loop.stop();
    }

    /// A cloneable handle that can interrupt whatever script is currently
    /// running in this engine from another thread. Interruption is
    /// cooperative: QuickJS polls the interrupt handler installed in
    /// [`Engine::new`] between bytecode steps and aborts with a `JsError` the
    /// next time it does, which `run`/`run_safe` surface as
    /// [`EngineError::Interrupted`]-shaped guest throws. Once fired, the
    /// engine cannot run further scripts — `kill()` is terminal, matching
    /// `close()`.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { cancelled: self.cancelled.clone() }
    }

    fn start_memory_watchdog(&self, cap_bytes: u64) {
        let cancelled = self.cancelled.clone();
        let on_error = self.on_error.clone();

        std::thread::spawn(move || loop {
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            let resident = resident_set_bytes();
            if resident > cap_bytes {
                cancelled.store(true, Ordering::SeqCst);
                if let Some(cb) = on_error.lock().unwrap().as_ref() {
                    cb(format!(
                        "memory cap exceeded: resident {resident} bytes > cap {cap_bytes} bytes"
                    ));
                }
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        });
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        modules::io::io::flush();
        self.close();
    }
}

/// See [`Engine::interrupt_handle`].
#[derive(Clone)]
pub struct InterruptHandle {
    cancelled: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Requests that the owning engine's currently running (or next) script
    /// be aborted. Safe to call from any thread, any number of times.
    pub fn kill(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `kill()` has already been called.
    pub fn killed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Best-effort resident-set-size reader for the memory watchdog (spec §4.2,
/// §9's substitution note). Linux-only; returns 0 elsewhere, which simply
/// disables the watchdog rather than erroring.
fn resident_set_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(kb) = line.strip_prefix("VmRSS:") {
                    if let Some(n) = kb.trim().split_whitespace().next() {
                        if let Ok(kb) = n.parse::<u64>() {
                            return kb * 1024;
                        }
                    }
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

/// A module loader that delegates resolution/loading to the embedder's
/// [`Host`] implementation.
#[derive(Clone)]
struct ModuleLoader {
    host: Rc<dyn Host>,
}

impl ModuleLoader {
    fn new(host: impl Host + 'static) -> Self {
        Self { host: Rc::new(host) }
    }
}

impl Resolver for ModuleLoader {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> JsResult<String> {
        let (dir, _) = base.rsplit_once('/').unwrap_or((".", ""));
        let path = self
            .host
            .resolve_module(dir.to_string(), name.to_string())
            .map_err(|_| rquickjs::Error::new_resolving(base, name))?;
        Ok(path.replace('\\', "/"))
    }
}

impl Loader for ModuleLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> JsResult<Module<'js>> {
        let source = self
            .host
            .load_module(name.to_string())
            .map_err(|_| rquickjs::Error::new_loading(name))?;
        Module::declare(ctx.clone(), name, source)
    }
}

trait CatchJsErrorExt {
    type Ok;
    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<Self::Ok>;
}

impl<T> CatchJsErrorExt for JsResult<T> {
    type Ok = T;
    fn catch(self, ctx: &Ctx<'_>) -> anyhow::Result<T> {
        match CatchResultExt::catch(self, ctx) {
            Ok(v) => Ok(v),
            Err(e) => Err(anyhow!("runtime error: {e:#?}")),
        }
    }
}

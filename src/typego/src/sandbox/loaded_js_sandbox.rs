use std::collections::HashMap;
use std::fmt::Debug;

use anyhow::anyhow;
use rquickjs::{CatchResultExt, Ctx, Function, Module, Object, Value};
use tokio::task::JoinHandle;
use tracing::{instrument, Level};
use typego_runtime::{Engine, InterruptHandle};

use super::js_sandbox::JSSandbox;
use super::metrics::{METRIC_SANDBOX_LOADS, METRIC_SANDBOX_UNLOADS};
use super::monitor::runtime::get_monitor_runtime;
use super::monitor::MonitorSet;
#[cfg(feature = "function_call_metrics")]
use crate::sandbox::metrics::EventHandlerMetricGuard;
use crate::sandbox::metrics::SandboxMetricsGuard;
use crate::{new_error, Result, Script};

const HANDLER_REGISTRY_KEY: &str = "__typego_handlers__";

/// An engine with a JavaScript run time loaded and guest JavaScript handlers loaded.
pub struct LoadedJSSandbox {
    engine: Engine,
    handlers: HashMap<String, Script>,
    // metric drop guard to manage sandbox metric
    _metric_guard: SandboxMetricsGuard<LoadedJSSandbox>,
}

/// RAII guard that aborts a spawned monitor task on drop.
///
/// Wraps a tokio `JoinHandle` to ensure the monitor task is cancelled when
/// the guard goes out of scope — whether that's after normal completion or
/// on early return. Keeps the spawn-abort lifecycle in one place rather than
/// requiring manual `abort()` calls at each exit point.
struct MonitorTask(JoinHandle<()>);

impl Drop for MonitorTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl LoadedJSSandbox {
    #[instrument(err(Debug), skip_all, level=Level::INFO)]
    pub(super) fn new(engine: Engine, handlers: HashMap<String, Script>) -> Result<LoadedJSSandbox> {
        for (name, script) in &handlers {
            register_handler(&engine, name, script).map_err(|e| new_error!("{e:#}"))?;
        }
        metrics::counter!(METRIC_SANDBOX_LOADS).increment(1);
        Ok(LoadedJSSandbox {
            engine,
            handlers,
            _metric_guard: SandboxMetricsGuard::new(),
        })
    }

    /// Handles an event by calling the specified function with the event data.
    #[instrument(err(Debug), skip(self, event, gc), level=Level::INFO)]
    pub fn handle_event<F>(&mut self, func_name: F, event: String, gc: Option<bool>) -> Result<String>
    where
        F: Into<String> + std::fmt::Debug,
    {
        let _json_val: serde_json::Value =
            serde_json::from_str(&event).map_err(|e| new_error!("invalid event JSON: {e}"))?;

        let should_gc = gc.unwrap_or(true);
        let func_name = func_name.into();
        if func_name.is_empty() {
            return Err(new_error!("Handler name must not be empty"));
        }

        #[cfg(feature = "function_call_metrics")]
        let _metric_guard = EventHandlerMetricGuard::new(&func_name, should_gc);

        let result = dispatch_handler(&self.engine, &func_name, &event).map_err(|e| new_error!("{e:#}"));

        if should_gc {
            self.engine.run_gc();
        }

        result
    }

    /// Unloads the Handlers from the sandbox and returns a `JSSandbox` that
    /// can register a different set of handlers. The engine itself keeps
    /// running; only the guest handler registry is logically abandoned (a
    /// fresh `add_handler`/`get_loaded_sandbox` pass simply overwrites it).
    #[instrument(err(Debug), skip_all, level=Level::DEBUG)]
    pub fn unload(self) -> Result<JSSandbox> {
        metrics::counter!(METRIC_SANDBOX_UNLOADS).increment(1);
        Ok(JSSandbox::from_engine(self.engine))
    }

    /// Returns whether the sandbox is currently poisoned.
    ///
    /// A poisoned sandbox is in an inconsistent state due to the guest not running to completion.
    /// This can happen when guest execution is interrupted (e.g., via `InterruptHandle::kill()`),
    /// or when an execution monitor fires.
    pub fn poisoned(&self) -> bool {
        self.engine.interrupt_handle().killed()
    }

    /// Get a handle to the interrupt handler for this sandbox,
    /// capable of interrupting guest execution.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.engine.interrupt_handle()
    }

    /// Handles an event with execution monitoring.
    ///
    /// The monitor enforces execution limits (time, CPU usage, etc.) and will
    /// terminate execution if limits are exceeded. If terminated, the sandbox
    /// will be poisoned and an error is returned.
    ///
    /// # Fail-Closed Semantics
    ///
    /// If the monitor fails to initialize, the handler is **never executed**.
    /// Execution cannot proceed unmonitored.
    ///
    /// # Tuple Monitors (OR semantics)
    ///
    /// Pass a tuple of monitors to enforce multiple limits. The first monitor
    /// to fire terminates execution, and the winning monitor's name is logged:
    ///
    /// ```text
    /// let monitor = (
    ///     WallClockMonitor::new(Duration::from_secs(5))?,
    ///     CpuTimeMonitor::new(Duration::from_millis(500))?,
    /// );
    /// loaded.handle_event_with_monitor("handler", "{}".into(), &monitor, None)?;
    /// ```
    ///
    /// # Arguments
    ///
    /// * `func_name` - The name of the handler function to call.
    /// * `event` - JSON string payload to pass to the handler.
    /// * `monitor` - The execution monitor (or tuple of monitors) to enforce limits.
    ///   Tuples race all sub-monitors; the first to fire wins and its name is logged.
    /// * `gc` - Whether to run garbage collection after the call (defaults to `true` if `None`).
    ///
    /// # Returns
    ///
    /// The handler result string on success, or an error if execution failed
    /// or was terminated by the monitor. If terminated, the sandbox will be
    /// poisoned and subsequent calls will fail until unloaded.
    #[instrument(err(Debug), skip(self, event, monitor, gc), level=Level::INFO)]
    pub fn handle_event_with_monitor<F, M>(
        &mut self,
        func_name: F,
        event: String,
        monitor: &M,
        gc: Option<bool>,
    ) -> Result<String>
    where
        F: Into<String> + std::fmt::Debug,
        M: MonitorSet,
    {
        let func_name = func_name.into();
        if func_name.is_empty() {
            return Err(new_error!("Handler name must not be empty"));
        }
        let interrupt_handle = self.interrupt_handle();

        // Phase 1: Build the racing future on the calling thread.
        // to_race() calls each sub-monitor's get_monitor() here, where
        // monitors can capture thread-local state (e.g., CPU clock handles).
        // If any monitor fails to initialize, we fail closed — handler never runs.
        let racing_future = monitor.to_race().map_err(|e| {
            tracing::error!("Failed to initialize execution monitor: {}", e);
            new_error!("execution monitor failed to start: {}", e)
        })?;

        // Phase 2: Spawn the racing future on the shared runtime. When the
        // first monitor fires, to_race() emits the metric and log, then we
        // kill() the engine's interrupt handle to terminate the guest.
        let runtime = get_monitor_runtime().ok_or_else(|| {
            tracing::error!("Monitor runtime is unavailable");
            new_error!("monitor runtime is unavailable")
        })?;

        let _monitor_task = MonitorTask(runtime.spawn(async move {
            racing_future.await;
            interrupt_handle.kill();
        }));

        // Phase 3: Execute the handler (blocking). When this returns (success
        // or error), _monitor_task drops and aborts the spawned monitor task.
        self.handle_event(&func_name, event, gc)
    }
}

impl Debug for LoadedJSSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedJSSandbox").finish()
    }
}

fn handler_registry<'js>(ctx: &Ctx<'js>) -> anyhow::Result<Object<'js>> {
    if let Ok(obj) = ctx.globals().get::<_, Object>(HANDLER_REGISTRY_KEY) {
        return Ok(obj);
    }
    let obj = Object::new(ctx.clone())?;
    ctx.globals().set(HANDLER_REGISTRY_KEY, obj.clone())?;
    Ok(obj)
}

/// Registers `script`'s handler function under `name` in the guest-side
/// handler registry.
///
/// Three shapes of handler script are supported:
///
/// * A script with an explicit `export default` is declared and evaluated
///   as a module, and its default export is taken as the handler.
/// * A script with `import`/`export` but no `export default` (a module that
///   merely defines a top-level `handler` function, never exporting it) is
///   still declared as a module — `import` is only legal in module
///   context — but since a module's top-level bindings are not otherwise
///   reachable from outside it, a synthetic `export default handler;` line
///   is appended before evaluation to surface it.
/// * A plain script with no `import`/`export` at all is evaluated directly,
///   and the top-level `handler` function it declares is looked up as a
///   global.
fn register_handler(engine: &Engine, name: &str, script: &Script) -> anyhow::Result<()> {
    let content = script.content();
    let has_default_export = content.contains("export default");
    let is_module = has_default_export || content.contains("export") || content.contains("import ");

    engine.vm_lock().with_lock(|| {
        engine.context().with(|ctx| -> anyhow::Result<()> {
            let handler_fn: Function = if is_module {
                let source = if has_default_export {
                    content.to_string()
                } else {
                    format!("{content}\nexport default handler;")
                };
                let module = Module::declare(ctx.clone(), name.to_string(), source)
                    .catch(&ctx)
                    .map_err(|e| anyhow!("failed to declare handler '{name}': {e:?}"))?;
                let (module, promise) = module
                    .eval()
                    .catch(&ctx)
                    .map_err(|e| anyhow!("failed to evaluate handler '{name}': {e:?}"))?;
                promise
                    .finish::<()>()
                    .catch(&ctx)
                    .map_err(|e| anyhow!("handler '{name}' module failed: {e:?}"))?;
                module
                    .get("default")
                    .map_err(|_| anyhow!("handler '{name}' module must have a default export"))?
            } else {
                ctx.eval::<Value, _>(content.to_string())
                    .catch(&ctx)
                    .map_err(|e| anyhow!("failed to evaluate handler '{name}': {e:?}"))?;
                ctx.globals()
                    .get::<_, Function>("handler")
                    .map_err(|_| anyhow!("handler '{name}' must define a global `handler` function"))?
            };

            let registry = handler_registry(&ctx)?;
            registry
                .set(name, handler_fn)
                .catch(&ctx)
                .map_err(|e| anyhow!("failed to register handler '{name}': {e:?}"))?;
            Ok(())
        })
    })
}

fn dispatch_handler(engine: &Engine, func_name: &str, event: &str) -> anyhow::Result<String> {
    engine.vm_lock().with_lock(|| {
        engine.context().with(|ctx| -> anyhow::Result<String> {
            let registry = handler_registry(&ctx)?;
            let handler: Function = registry
                .get(func_name)
                .map_err(|_| anyhow!("Handler does not exist for function name: {func_name}"))?;

            let arg: Value = ctx
                .json_parse(event.to_string())
                .catch(&ctx)
                .map_err(|e| anyhow!("{e:?}"))?;
            let result: Value = handler.call((arg,)).catch(&ctx).map_err(|e| anyhow!("{e:?}"))?;

            // An `async function handler` returns a Promise rather than its
            // settled value; drive it to completion here.
            let result: Value = match result.into_promise() {
                Some(promise) => promise.finish::<Value>().catch(&ctx).map_err(|e| anyhow!("{e:?}"))?,
                None => result,
            };

            ctx.json_stringify(result)
                .catch(&ctx)
                .map_err(|e| anyhow!("{e:?}"))?
                .map(|s| s.to_string())
                .transpose()
                .catch(&ctx)
                .map_err(|e| anyhow!("{e:?}"))
                .map(|s| s.unwrap_or_else(|| "null".to_string()))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SandboxBuilder, Script};

    fn get_valid_handler() -> Script {
        Script::from_content(
            r#"
        export default function handler(event) {
            event.uri = "/redirected.html";
            return event
        }
        "#,
        )
    }

    fn get_valid_event() -> String {
        r#"
        {
            "uri": "/index.html"
        }
        "#
        .to_string()
    }

    fn get_static_counter_handler() -> Script {
        Script::from_content(
            r#"
        let count = 0;
        export default function handler(event) {
            event.count = ++count;
            return event
        }
        "#,
        )
    }

    fn get_static_counter_event() -> String {
        r#"
        {
            "count": 0
        }
        "#
        .to_string()
    }

    fn get_loaded_sandbox() -> Result<LoadedJSSandbox> {
        let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
        let mut sandbox = proto_js_sandbox.load_runtime().unwrap();

        sandbox.add_handler("handler", get_valid_handler()).unwrap();

        sandbox.get_loaded_sandbox()
    }

    #[test]
    fn test_handle_event() {
        let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
        let mut sandbox = proto_js_sandbox.load_runtime().unwrap();

        sandbox.add_handler("handler", get_valid_handler()).unwrap();

        let mut loaded_js_sandbox = sandbox.get_loaded_sandbox().unwrap();
        let gc = Some(true);
        let result = loaded_js_sandbox.handle_event("handler".to_string(), get_valid_event(), gc);

        assert!(result.is_ok());
    }

    #[test]
    fn test_handle_event_accumulates_state() {
        let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
        let mut sandbox = proto_js_sandbox.load_runtime().unwrap();
        sandbox
            .add_handler("handler", get_static_counter_handler())
            .unwrap();

        let mut loaded_js_sandbox = sandbox.get_loaded_sandbox().unwrap();
        let gc = Some(true);
        let result = loaded_js_sandbox.handle_event("handler", get_static_counter_event(), gc);

        assert!(result.is_ok());
        let response = result.unwrap();
        let response_json: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(response_json["count"], 1);

        let result = loaded_js_sandbox.handle_event("handler", get_static_counter_event(), gc);
        assert!(result.is_ok());
        let response = result.unwrap();
        let response_json: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(response_json["count"], 2);
    }

    #[test]
    fn test_unload_and_reuse() {
        let proto_js_sandbox = SandboxBuilder::new().build().unwrap();
        let mut sandbox = proto_js_sandbox.load_runtime().unwrap();
        sandbox
            .add_handler("handler", get_static_counter_handler())
            .unwrap();
        let loaded_js_sandbox = sandbox.get_loaded_sandbox().unwrap();

        let mut sandbox = loaded_js_sandbox.unload().unwrap();
        sandbox
            .add_handler("handler2", get_static_counter_handler())
            .unwrap();
        let mut reloaded = sandbox.get_loaded_sandbox().unwrap();

        let result = reloaded.handle_event("handler2", get_static_counter_event(), Some(true));
        assert!(result.is_ok());
    }

    #[test]
    fn test_unload() {
        let sandbox = get_loaded_sandbox().unwrap();

        let result = sandbox.unload();

        assert!(result.is_ok());
    }

    use crate::sandbox::monitor::ExecutionMonitor;

    /// A mock monitor that always fails to initialize (returns Err).
    /// Used to test fail-closed behavior.
    struct FailingMonitor;

    impl ExecutionMonitor for FailingMonitor {
        fn get_monitor(&self) -> typego_runtime::EngineResult<impl std::future::Future<Output = ()> + Send + 'static> {
            Err::<std::future::Ready<()>, _>(new_error!("Simulated initialization failure"))
        }

        fn name(&self) -> &'static str {
            "failing-monitor"
        }
    }

    #[test]
    fn test_handle_event_with_monitor_fails_if_monitor_cannot_start() {
        let mut loaded = get_loaded_sandbox().unwrap();
        let monitor = FailingMonitor;

        // Should fail because monitor returns Err (fail closed, not open)
        let result = loaded.handle_event_with_monitor("handler", get_valid_event(), &monitor, None);

        assert!(result.is_err(), "Should fail when monitor can't start");
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("failed to start"),
            "Error should mention monitor failure: {}",
            err
        );

        // Sandbox should NOT be poisoned - we never ran the handler
        assert!(
            !loaded.poisoned(),
            "Sandbox should not be poisoned when monitor fails to start"
        );
    }
}

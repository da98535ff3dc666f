use std::collections::HashMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, Level};
use typego_runtime::Engine;

use super::host_fn::{install_host_modules, Function, HostModule};
use super::js_sandbox::JSSandbox;
use super::metrics::SandboxMetricsGuard;
use crate::fs_host::{FsHost, HostHandle, NullHost};
use crate::resolver::FileSystem;
use crate::Result;

/// An engine with no JavaScript run time loaded and no guest code.
/// This is used to register new host functions prior to loading the JavaScript run time.
pub struct ProtoJSSandbox {
    memory_limit_bytes: Option<u64>,
    host: Option<Box<dyn typego_runtime::host::Host>>,
    host_modules: HashMap<String, HostModule>,
    // metric drop guard to manage sandbox metric
    _metric_guard: SandboxMetricsGuard<ProtoJSSandbox>,
}

impl ProtoJSSandbox {
    pub(super) fn new(memory_limit_bytes: Option<u64>) -> Self {
        Self {
            memory_limit_bytes,
            host: None,
            host_modules: HashMap::new(),
            _metric_guard: SandboxMetricsGuard::new(),
        }
    }

    /// Install a custom file system for module resolution and loading.
    ///
    /// Enables JavaScript module imports using the provided ~FileSystem~ implementation.
    #[instrument(skip_all, level=Level::INFO)]
    pub fn set_module_loader<Fs: FileSystem + Clone + Send + Sync + 'static>(
        mut self,
        file_system: Fs,
    ) -> Result<Self> {
        self.host = Some(Box::new(FsHost::new(file_system)));
        Ok(self)
    }

    /// Load the JavaScript runtime into the sandbox.
    #[instrument(skip(self), level=Level::INFO)]
    pub fn load_runtime(self) -> Result<JSSandbox> {
        let host = HostHandle(self.host.unwrap_or_else(|| Box::new(NullHost)));
        let engine = Engine::new(host, self.memory_limit_bytes, None)
            .map_err(|e| crate::new_error!("failed to initialize engine: {e:#}"))?;

        install_host_modules(&engine, self.host_modules)
            .map_err(|e| crate::new_error!("failed to install host modules: {e:#}"))?;

        Ok(JSSandbox::new(engine))
    }

    /// Register a host module that can be called from the guest JavaScript code.
    ///
    /// This method should be called **before** [`ProtoJSSandbox::load_runtime`], while
    /// the sandbox is still in its "proto" (uninitialized) state. After
    /// [`load_runtime`](Self::load_runtime) is called, the set of host modules and
    /// functions is fixed for the resulting [`JSSandbox`].
    ///
    /// Calling this method multiple times with the same `name` refers to the same
    /// module; additional calls will reuse the existing module instance and allow
    /// you to register more functions on it. The first call creates the module and
    /// subsequent calls return the previously created module.
    ///
    /// Module names are matched by exact string equality from the guest
    /// JavaScript environment. They should be valid UTF‑8 strings and while there is
    /// no explicit restriction on special characters, using simple, ASCII identifiers
    /// (e.g. `"fs"`, `"net"`, `"my_module"`) is recommended for portability and clarity.
    ///
    /// # Example
    ///
    /// ```
    /// use typego::SandboxBuilder;
    ///
    /// // Create a proto sandbox and register a host function.
    /// let mut sbox = SandboxBuilder::new().build()?;
    ///
    /// // Register a module and a function on it before loading the runtime.
    /// sbox.host_module("math").register("add", |a: i32, b: i32| a + b);
    ///
    /// // Once all host modules/functions are registered, load the JS runtime.
    /// let js_sandbox = sbox.load_runtime()?;
    /// # Ok::<(), typego::Error>(())
    /// ```
    #[instrument(skip(self), level=Level::INFO)]
    pub fn host_module(&mut self, name: impl Into<String> + Debug) -> &mut HostModule {
        self.host_modules.entry(name.into()).or_default()
    }

    /// Register a host function that can be called from the guest JavaScript code.
    /// This is equivalent to calling `sbox.host_module(module).register(name, func)`.
    ///
    /// Registering a function with the same `module` and `name` as an existing function
    /// overwrites the previous registration.
    #[instrument(skip(self, func), level=Level::INFO)]
    pub fn register<Output: Serialize, Args: DeserializeOwned>(
        &mut self,
        module: impl Into<String> + Debug,
        name: impl Into<String> + Debug,
        func: impl Function<Output, Args> + Send + Sync + 'static,
    ) -> Result<()> {
        self.host_module(module).register(name, func);
        Ok(())
    }
}

impl std::fmt::Debug for ProtoJSSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoJSSandbox").finish()
    }
}

impl Default for ProtoJSSandbox {
    fn default() -> Self {
        Self::new(None)
    }
}

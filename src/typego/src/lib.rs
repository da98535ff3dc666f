//! This crate embeds a TypeScript/JavaScript bridge runtime directly in a
//! host process, on top of `typego-runtime`'s [`Engine`]/[`Worker`]: engine
//! construction, filesystem-backed module resolution, handler registration
//! and dispatch, execution monitoring (wall-clock/CPU time limits), and a
//! memory watchdog.
#![deny(dead_code, missing_docs, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(any(test, debug_assertions), allow(clippy::disallowed_macros))]

mod fs_host;
mod resolver;
mod script;

/// Sandbox module containing all sandbox-related types
pub mod sandbox;

/// A running engine with a JavaScript run time loaded but no handlers registered.
pub use sandbox::js_sandbox::JSSandbox;
/// An engine with handlers registered and ready to dispatch events.
pub use sandbox::loaded_js_sandbox::LoadedJSSandbox;
/// An engine with no JavaScript handlers loaded yet.
/// This is used to register new host functions prior to loading the JavaScript runtime.
pub use sandbox::proto_js_sandbox::ProtoJSSandbox;
/// A builder for creating a new `JSSandbox`
pub use sandbox::sandbox_builder::SandboxBuilder;
/// Types for working with JS script.
pub use script::Script;
/// The Result of a function call
pub type Result<T> = typego_runtime::EngineResult<T>;
/// The error type for engine operations
pub type Error = typego_runtime::EngineError;
/// A handle to interrupt guest code execution.
pub use typego_runtime::InterruptHandle;
/// The host-side entry point for a fresh engine running on its own thread.
pub use typego_runtime::Worker;
/// Module resolution and loading functionality.
pub use resolver::{FileMetadata, FileSystem, FileSystemEmbedded, ResolveError};
/// The monitor module — re-exports `sleep` so custom monitors don't couple to tokio directly.
pub use sandbox::monitor;
/// CPU time based execution monitor.
#[cfg(feature = "monitor-cpu-time")]
pub use sandbox::monitor::CpuTimeMonitor;
// Execution monitoring
/// Trait for implementing execution monitors that can terminate handler execution.
pub use sandbox::monitor::ExecutionMonitor;
/// Sealed trait for monitor composition — automatically derived for all
/// `ExecutionMonitor` impls and for tuples of up to 5 monitors.
pub use sandbox::monitor::MonitorSet;
/// Wall-clock based execution monitor.
#[cfg(feature = "monitor-wall-clock")]
pub use sandbox::monitor::WallClockMonitor;

/// Build an [`Error::Other`] from a format string, the same shorthand the
/// underlying runtime's own error sites use for ad hoc failures.
#[macro_export]
macro_rules! new_error {
    ($($arg:tt)*) => {
        $crate::Error::other(format!($($arg)*))
    };
}

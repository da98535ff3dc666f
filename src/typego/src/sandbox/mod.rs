//! The `sandbox` module contains the engine lifecycle types built on top of
//! `typego-runtime`'s `Engine`.
/// Definition of a host function that can be called from guest JavaScript code.
pub(crate) mod host_fn;
/// An engine with a JavaScript run time loaded but no handlers registered.
pub(crate) mod js_sandbox;
/// An engine with handlers registered and ready to dispatch events.
pub(crate) mod loaded_js_sandbox;
/// Metric definitions for Sandbox module.
pub(crate) mod metrics;
/// Execution monitoring and enforcement (timeouts, resource limits, etc.).
pub mod monitor;
/// An engine with no JavaScript handlers loaded yet.
/// This is used to register new host functions prior to loading the JavaScript run time.
pub(crate) mod proto_js_sandbox;
/// A builder for creating a new `JSSandbox`
pub(crate) mod sandbox_builder;

use thiserror::Error;

/// Structured error kinds distinguishing how a guest/host interaction failed,
/// mirroring the Error Handling Design table: callers that want to react to a
/// specific failure mode (e.g. retry after a memory cap) match on this rather
/// than string-sniffing an `anyhow::Error` message.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The guest script threw; the original guest value's string form is preserved.
    #[error("guest threw: {0}")]
    GuestThrow(String),

    /// Host code panicked while servicing a guest call.
    #[error("host panic in bridge: {0}")]
    HostPanic(String),

    /// Guest code called `panic(v)`.
    #[error("panic: {0}")]
    IntrinsicPanic(String),

    /// Argument conversion between guest and host values failed.
    #[error("type error: {0}")]
    TypeError(String),

    /// The memory watchdog observed resident memory over the configured cap.
    #[error("memory cap exceeded: resident {resident_bytes} bytes > cap {cap_bytes} bytes")]
    MemoryCapExceeded {
        resident_bytes: u64,
        cap_bytes: u64,
    },

    /// A promise was rejected with no attached handler.
    #[error("unhandled promise rejection: {0}")]
    UnhandledRejection(String),

    /// A `typego.scope` body exited without the active panic being recovered.
    #[error("scope re-panic: {0}")]
    ScopeRePanic(String),

    /// An IO/HTTP/filesystem host call failed.
    #[error("io error: {0}")]
    Io(String),

    /// The engine was interrupted (cancellation handle fired, or the
    /// watchdog raised the interrupt that produced a different variant above).
    #[error("interrupted")]
    Interrupted,

    /// Catch-all for ad hoc failures that don't fit another variant.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

use crate::sandbox::proto_js_sandbox::ProtoJSSandbox;
use crate::Result;

/// A builder for a [`ProtoJSSandbox`].
pub struct SandboxBuilder {
    memory_limit_bytes: Option<u64>,
}

impl SandboxBuilder {
    /// Create a new SandboxBuilder
    pub fn new() -> Self {
        Self { memory_limit_bytes: None }
    }

    /// Set a soft resident-memory cap for the engine. Once the watchdog
    /// observes resident memory over this cap, the engine is interrupted
    /// and any subsequent call will see it poisoned.
    pub fn with_memory_limit_bytes(mut self, memory_limit_bytes: u64) -> Self {
        self.memory_limit_bytes = Some(memory_limit_bytes);
        self
    }

    /// Build the ProtoJSSandbox
    pub fn build(self) -> Result<ProtoJSSandbox> {
        Ok(ProtoJSSandbox::new(self.memory_limit_bytes))
    }
}

impl Default for SandboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared constants and worker message framing for typego.

use serde::{Deserialize, Serialize};

/// Environment variable names always visible to guest code via the `process`
/// global, regardless of the host's own environment.
pub const ENV_ALLOW_LIST: &[&str] = &["PATH", "LANG", "PWD", "HOSTNAME", "USER"];

/// Prefix that, in addition to [`ENV_ALLOW_LIST`], makes a host environment
/// variable visible to guest code.
pub const ENV_ALLOW_PREFIX: &str = "TYPEGO_";

/// Returns true if `name` should be exposed to guest code through `process.env`.
pub fn env_var_allowed(name: &str) -> bool {
    ENV_ALLOW_LIST.contains(&name) || name.starts_with(ENV_ALLOW_PREFIX)
}

/// Default capacity of a worker's inbound message channel when the embedder
/// does not specify one.
pub const DEFAULT_WORKER_CHANNEL_CAPACITY: usize = 64;

/// Default capacity of a buffered channel created by the `makeChan`
/// intrinsic when the guest does not pass a capacity argument.
pub const DEFAULT_CHAN_CAPACITY: usize = 0;

/// A message exchanged between a worker's inbox and its parent, carrying a
/// JSON-encoded payload the way `postMessage`/`onmessage` do in the spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMessage {
    /// JSON-encoded payload, already serialized by the sender so the
    /// channel itself never needs to know the guest value's shape.
    pub payload: String,
}

impl WorkerMessage {
    pub fn new(payload: String) -> Self {
        Self { payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_matches() {
        assert!(env_var_allowed("PATH"));
        assert!(env_var_allowed("USER"));
        assert!(!env_var_allowed("SECRET_TOKEN"));
    }

    #[test]
    fn prefix_matches() {
        assert!(env_var_allowed("TYPEGO_DEBUG"));
        assert!(!env_var_allowed("TYPEGOOSE"));
    }
}

use anyhow::Result;

/// The host environment a [`crate::Engine`] resolves and loads guest modules
/// through. Implemented by the embedder (typically the `typego` crate's
/// filesystem-backed resolver, or a worker's parent-supplied loader).
pub trait Host: Send + Sync {
    /// Resolve a module name to a module specifier (usually a path).
    /// The base is the specifier of the module that is importing the module.
    fn resolve_module(&self, base: String, name: String) -> Result<String>;

    /// Obtain the module source code for a given module specifier.
    fn load_module(&self, name: String) -> Result<String>;
}

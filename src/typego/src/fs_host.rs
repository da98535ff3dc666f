//! Adapts a [`crate::FileSystem`] implementation into a [`typego_runtime::host::Host`],
//! the replacement for `proto_js_sandbox.rs`'s `ResolveModule`/`LoadModule`
//! host function pair: module resolution now happens as a direct Rust call
//! rather than a guest-to-host round trip through a VM boundary.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use oxc_resolver::{ResolveOptions, ResolverGeneric};
use typego_runtime::host::Host;

use crate::resolver::FileSystem;

/// A [`Host`] backed by an `oxc_resolver` resolver over an embedder-supplied
/// filesystem, grounded on `proto_js_sandbox.rs`'s `set_module_loader`.
pub struct FsHost<Fs: FileSystem + Clone + 'static> {
    resolver: ResolverGeneric<Fs>,
    file_system: Fs,
}

impl<Fs: FileSystem + Clone + 'static> FsHost<Fs> {
    pub fn new(file_system: Fs) -> Self {
        let resolver = ResolverGeneric::new_with_file_system(
            file_system.clone(),
            ResolveOptions {
                extensions: vec![".js".into(), ".mjs".into()],
                condition_names: vec!["import".into(), "module".into()],
                ..Default::default()
            },
        );
        Self { resolver, file_system }
    }
}

impl<Fs: FileSystem + Clone + Send + Sync + 'static> Host for FsHost<Fs> {
    fn resolve_module(&self, base: String, specifier: String) -> Result<String> {
        tracing::debug!(base = %base, specifier = %specifier, "resolving module");
        let resolved = self
            .resolver
            .resolve(&base, &specifier)
            .map_err(|e| anyhow!("failed to resolve module '{specifier}' from '{base}': {e:?}"))?;
        Ok(resolved.path().to_string_lossy().replace('\\', "/"))
    }

    fn load_module(&self, path: String) -> Result<String> {
        tracing::debug!(path = %path, "loading module");
        self.file_system
            .read_to_string(&PathBuf::from(&path))
            .map_err(|e| anyhow!("failed to read module '{path}': {e}"))
    }
}

/// A [`Host`] that resolves and loads nothing, for an engine with no
/// filesystem-backed module loading configured.
pub struct NullHost;

impl Host for NullHost {
    fn resolve_module(&self, base: String, specifier: String) -> Result<String> {
        Err(anyhow!("no module loader configured (tried resolving '{specifier}' from '{base}')"))
    }

    fn load_module(&self, name: String) -> Result<String> {
        Err(anyhow!("no module loader configured (tried loading '{name}')"))
    }
}

/// Wraps a type-erased [`Host`] so `ProtoJSSandbox` can hold one of several
/// concrete `FsHost<Fs>` instantiations (or [`NullHost`]) behind a single
/// field without a generic parameter leaking onto `ProtoJSSandbox` itself.
pub(crate) struct HostHandle(pub Box<dyn Host>);

impl Host for HostHandle {
    fn resolve_module(&self, base: String, name: String) -> Result<String> {
        self.0.resolve_module(base, name)
    }

    fn load_module(&self, name: String) -> Result<String> {
        self.0.load_module(name)
    }
}

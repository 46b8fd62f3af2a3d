//! Explicit strategy registry for execution providers.
//!
//! Providers are registered by name at process start (composition in
//! `main.rs`), never through import-time side effects, so the active
//! strategy set is visible and testable. The Kubernetes SPDY provider of
//! the original deployment plugs in here; this crate ships `"local"`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::remote::RemoteExecutor;

pub type ProviderFactory =
    Box<dyn Fn(&Settings) -> Result<Arc<dyn RemoteExecutor>, ProviderError> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown execution provider: {0}")]
    UnknownProvider(String),
    #[error("provider initialization failed: {0}")]
    Init(String),
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name. A later registration under the
    /// same name replaces the earlier one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Settings) -> Result<Arc<dyn RemoteExecutor>, ProviderError>
            + Send
            + Sync
            + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate the named provider.
    pub fn create(
        &self,
        name: &str,
        settings: &Settings,
    ) -> Result<Arc<dyn RemoteExecutor>, ProviderError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;
        factory(settings)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

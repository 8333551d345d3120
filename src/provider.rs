//! Text-generation backends and the registry that constructs them.
//!
//! Commands never name a concrete backend. They ask a [`ProviderRegistry`]
//! for a provider and the registry resolves which backend to build from the
//! command line, the environment and the persisted config, in that order.
//! Backends add themselves through an explicit `register` function called
//! once from the binary's bootstrap path:
//!
//! ```
//! use ssage::provider::ProviderRegistry;
//!
//! let mut registry = ProviderRegistry::new();
//! ssage::ollama::register(&mut registry);
//! assert_eq!(registry.available(), vec!["ollama".to_string()]);
//! ```

use crate::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Environment variable consulted when no explicit provider name is given.
pub const PROVIDER_ENV_VAR: &str = "SSAGE_PROVIDER";

/// Backend used when nothing else names one.
pub const DEFAULT_PROVIDER: &str = "ollama";

/// A backend that turns a prompt into text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Sends `prompt` and returns the complete response.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The full prompt, already enhanced by the pipeline
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or answers with a
    /// failure status.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Sends `prompt` and calls `on_token` for every chunk as it arrives.
    ///
    /// # Arguments
    ///
    /// * `prompt` - The full prompt, already enhanced by the pipeline
    /// * `on_token` - Called once per chunk, in arrival order
    ///
    /// # Returns
    ///
    /// The full accumulated response so callers can post-process it after
    /// rendering the chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the stream breaks. Chunks
    /// already passed to `on_token` are not taken back.
    async fn generate_stream(
        &self,
        prompt: &str,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<String>;

    /// Unique identifier of this backend (e.g. `"ollama"`).
    fn name(&self) -> &str;
}

/// Constructor for a provider, given the model requested by the user.
///
/// The model string is forwarded unchanged; an empty string means "let the
/// backend pick".
pub type ProviderFactory = Box<dyn Fn(&str) -> Result<Box<dyn Provider>> + Send + Sync>;

/// Name → factory mapping for every backend compiled into the binary.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a backend factory under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered. Two backends sharing a name is
    /// a build mistake, not something a user can recover from at runtime.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            panic!("provider: provider {:?} already registered", name);
        }
        debug!("Registered provider '{}'", name);
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Sorted names of all registered backends.
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Resolves the effective backend name and builds it for `model`.
    ///
    /// Resolution order: `name_override` → `SSAGE_PROVIDER` → config file
    /// `provider` → `"ollama"`.
    ///
    /// # Arguments
    ///
    /// * `name_override` - Backend named on the command line, if any
    /// * `model` - Model forwarded to the factory; empty lets the backend pick
    ///
    /// # Errors
    ///
    /// Returns an error listing the available names if the resolved name is
    /// not registered, or whatever the factory itself fails with.
    pub fn create(&self, name_override: Option<&str>, model: &str) -> Result<Box<dyn Provider>> {
        let name = resolve_provider_name(
            name_override,
            || std::env::var(PROVIDER_ENV_VAR).ok(),
            || Config::load().ok().and_then(|config| config.provider),
        );
        self.build(&name, model)
    }

    /// Builds the backend registered under exactly `name`.
    pub fn build(&self, name: &str, model: &str) -> Result<Box<dyn Provider>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "provider: unknown provider {:?} (available: {})\n  → Register a factory for it or pick one of the available providers",
                name,
                self.available().join(", ")
            )
        })?;
        info!("Using provider '{}'", name);
        factory(model)
    }
}

/// Applies the provider-name priority chain.
///
/// Each source is only consulted when every higher-priority source came up
/// empty.
pub fn resolve_provider_name<E, C>(name_override: Option<&str>, env: E, config: C) -> String
where
    E: FnOnce() -> Option<String>,
    C: FnOnce() -> Option<String>,
{
    if let Some(name) = name_override.filter(|name| !name.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = env().filter(|name| !name.is_empty()) {
        return name;
    }
    if let Some(name) = config().filter(|name| !name.is_empty()) {
        return name;
    }
    DEFAULT_PROVIDER.to_string()
}

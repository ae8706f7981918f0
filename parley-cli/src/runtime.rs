//! Wiring shared by every command: registry, key pool and model factory.

use std::sync::Arc;

use anyhow::{Context, Result};
use parley_models::{KeyManager, ModelFactory, ProviderRegistry};
use tracing::debug;

use crate::config::ParleyConfig;

pub struct Runtime {
    pub registry: Arc<ProviderRegistry>,
    pub keys: Arc<KeyManager>,
    pub factory: Arc<ModelFactory>,
}

impl Runtime {
    /// Built-in providers plus the config's `[providers.*]` sections.
    pub fn build(config: &ParleyConfig) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::with_defaults());
        for (name, spec) in &config.providers {
            registry
                .register_provider(name, spec)
                .with_context(|| format!("Invalid provider '{name}' in config"))?;
        }

        let keys = Arc::new(KeyManager::new());
        if let Some(seed) = &config.keys.seed {
            debug!("pinning first key lookup to configured seed");
            keys.set_seed_once(seed.clone());
        }

        let factory = Arc::new(ModelFactory::http(registry.clone(), keys.clone()));
        Ok(Self {
            registry,
            keys,
            factory,
        })
    }
}

//! Wiring of the core services from configuration

use anyhow::{Context, Result};
use ensemble_core::blockchain::{AbiRegistry, ProviderRegistry};
use ensemble_core::models::Configuration;
use ensemble_core::workflow::{
    Clock, InstanceOrchestrator, InstanceStore, JsonFileInstanceStore, SnapshotStore,
    SystemClock, TriggerEvaluator,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Resolve the configuration file path, expanding a leading `~/`
pub fn resolve_config_path(config_file: Option<PathBuf>) -> Result<PathBuf> {
    match config_file {
        Some(path) => {
            let raw = path.to_string_lossy();
            if let Some(rest) = raw.strip_prefix("~/") {
                let home = dirs::home_dir().context("Could not determine home directory")?;
                Ok(home.join(rest))
            } else {
                Ok(path)
            }
        }
        None => Configuration::default_config_path()
            .map_err(|e| anyhow::anyhow!("Failed to get default config path: {}", e)),
    }
}

/// Load configuration from `path` and overlay environment variables
pub fn load_configuration(path: &PathBuf) -> Result<Configuration> {
    let mut config = Configuration::load_from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    config.apply_env_overrides();

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Invalid configuration:\n  - {}",
            errors.join("\n  - ")
        ));
    }

    Ok(config)
}

/// Services shared by every command
pub struct AppContext {
    pub config: Configuration,
    pub orchestrator: Arc<InstanceOrchestrator>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn from_configuration(config: Configuration) -> Result<Self> {
        let store_path = config.resolved_store_path();
        let store: Arc<dyn InstanceStore> = Arc::new(
            JsonFileInstanceStore::new(&store_path)
                .with_context(|| format!("Failed to open store {}", store_path.display()))?,
        );

        let providers = ProviderRegistry::from_configuration(&config)
            .context("Failed to initialize RPC providers")?;

        let abis = AbiRegistry::new();
        let abi_dir = config.resolved_abi_dir();
        if abi_dir.is_dir() {
            let loaded = abis.load_dir(&abi_dir)?;
            tracing::debug!(dir = %abi_dir.display(), loaded, "Loaded ABI documents");
        } else {
            tracing::debug!(dir = %abi_dir.display(), "ABI directory does not exist");
        }
        if abis.is_empty() {
            tracing::warn!(dir = %abi_dir.display(), "No contract ABIs loaded");
        }
        tracing::info!(
            networks = ?providers.networks(),
            abis = abis.len(),
            "Trigger engine ready"
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let evaluator = TriggerEvaluator::new(
            Arc::new(providers),
            Arc::new(abis),
            Arc::new(SnapshotStore::new(store.clone())),
            clock.clone(),
        )
        .with_timezone(config.reference_timezone());

        let orchestrator = Arc::new(InstanceOrchestrator::new(
            store,
            Arc::new(evaluator),
            clock.clone(),
        ));

        Ok(Self {
            config,
            orchestrator,
            clock,
        })
    }
}

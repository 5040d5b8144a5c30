//! Per-network blockchain providers

use crate::blockchain::abi::AbiFunction;
use crate::blockchain::json_rpc::JsonRpcProvider;
use crate::blockchain::retry::{RetryPolicy, RetryingCaller};
use crate::error::{EnsembleError, Result, RpcError};
use crate::models::configuration::{Configuration, KNOWN_NETWORKS};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Handle able to run read-only contract calls on one network
#[async_trait]
pub trait ContractCaller: Send + Sync {
    /// Call the zero-argument `function` on `address` and decode its result
    async fn call(
        &self,
        address: &str,
        function: &AbiFunction,
    ) -> std::result::Result<Value, RpcError>;
}

/// Resolves a network name to a caller
pub trait BlockchainProvider: Send + Sync {
    /// Fails with `ProviderNotConfigured` when no endpoint is registered
    fn get_provider(&self, network: &str) -> Result<Arc<dyn ContractCaller>>;
}

/// Chain id of the networks known to the engine
pub fn chain_id(network: &str) -> Option<u64> {
    match network {
        "fuse" => Some(122),
        "sepolia" => Some(11_155_111),
        "base_sepolia" => Some(84_532),
        "op_sepolia" => Some(11_155_420),
        _ => None,
    }
}

/// Network name to caller
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn ContractCaller>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One retrying JSON-RPC provider per configured network
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let registry = Self::new();
        let policy = RetryPolicy::from(&config.retry);

        for (network, endpoint) in &config.networks {
            let provider = JsonRpcProvider::new(endpoint, config.rpc_timeout())?;
            tracing::info!(
                network = %network,
                endpoint = %provider.endpoint(),
                chain_id = ?chain_id(network),
                "Initialized RPC provider"
            );
            registry.register(
                network,
                Arc::new(RetryingCaller::new(Arc::new(provider), policy.clone())),
            );
        }

        for network in KNOWN_NETWORKS {
            if !config.networks.contains_key(*network) {
                tracing::warn!(network = %network, "RPC URL is not set");
            }
        }

        Ok(registry)
    }

    pub fn register(&self, network: &str, caller: Arc<dyn ContractCaller>) {
        self.providers.insert(network.to_string(), caller);
    }

    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl BlockchainProvider for ProviderRegistry {
    fn get_provider(&self, network: &str) -> Result<Arc<dyn ContractCaller>> {
        self.providers
            .get(network)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EnsembleError::ProviderNotConfigured(network.to_string()))
    }
}

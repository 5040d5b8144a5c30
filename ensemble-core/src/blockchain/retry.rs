//! Bounded exponential backoff for transient RPC failures

use crate::blockchain::abi::AbiFunction;
use crate::blockchain::provider::ContractCaller;
use crate::error::RpcError;
use crate::models::configuration::RetrySettings;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(retry as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        call = label,
                        attempts = attempt,
                        error = %e,
                        "RPC call failed, giving up"
                    );
                    return Err(RpcError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient RPC failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Caller that retries transient failures of the wrapped caller
pub struct RetryingCaller {
    inner: Arc<dyn ContractCaller>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(inner: Arc<dyn ContractCaller>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ContractCaller for RetryingCaller {
    async fn call(&self, address: &str, function: &AbiFunction) -> Result<Value, RpcError> {
        let label = format!("{}.{}", address, function.name);
        self.policy
            .run(&label, || self.inner.call(address, function))
            .await
    }
}

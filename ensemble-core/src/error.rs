//! Error taxonomy for trigger evaluation, instance lifecycle and interpolation

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the ensemble core
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Unsupported trigger type: {0}")]
    UnsupportedTriggerType(String),

    #[error("No RPC provider configured for network '{0}'")]
    ProviderNotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Workflow instance {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Workflow instance {0} is not running")]
    NotRunning(Uuid),

    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    #[error("Invalid trigger '{trigger}': {reason}")]
    InvalidTrigger { trigger: String, reason: String },

    #[error("Workflow instance {0} was modified concurrently")]
    VersionConflict(Uuid),

    #[error("RPC call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Failures reported by a blockchain provider
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// Network-level failure (connection refused, reset, DNS)
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Error object returned by the node, e.g. an execution revert
    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<RpcError> },
}

impl RpcError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::Timeout(_) => true,
            // -32005 is the conventional "limit exceeded" code used by hosted nodes
            RpcError::Node { code, .. } => *code == -32005 || *code == 429,
            RpcError::Decode(_) | RpcError::Exhausted { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EnsembleError>;

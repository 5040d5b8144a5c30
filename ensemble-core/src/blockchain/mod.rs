//! Blockchain access: ABI handling and per-network contract callers

pub mod abi;
pub mod json_rpc;
pub mod provider;
pub mod retry;

pub use abi::{Abi, AbiFunction, AbiParam, AbiRegistry};
pub use json_rpc::JsonRpcProvider;
pub use provider::{chain_id, BlockchainProvider, ContractCaller, ProviderRegistry};
pub use retry::{RetryPolicy, RetryingCaller};

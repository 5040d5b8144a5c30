//! # Ensemble Core Library
//!
//! Trigger evaluation, snapshot storage, template interpolation and instance
//! orchestration for on-chain workflows.

pub mod blockchain;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::{EnsembleError, Result, RpcError};

//! Data models for ensemble

pub mod configuration;
pub mod document;
pub mod workflow;

pub use configuration::*;
pub use document::*;
pub use workflow::*;

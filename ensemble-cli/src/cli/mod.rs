//! CLI command handling

pub mod context;
pub mod handlers;
pub mod workflow;
pub mod workflow_handlers;

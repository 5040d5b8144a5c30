//! Trigger engine and instance orchestration

pub mod clock;
pub mod evaluator;
pub mod interpolation;
pub mod orchestrator;
pub mod periodic;
pub mod persistence;
pub mod poller;
pub mod snapshots;

pub use clock::*;
pub use evaluator::*;
pub use interpolation::*;
pub use orchestrator::*;
pub use periodic::*;
pub use persistence::*;
pub use poller::*;
pub use snapshots::*;

//! Service layer

pub mod logging;

pub use logging::*;

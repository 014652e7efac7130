//! Gatekeeper core types and utilities

pub mod error;
pub mod tracing;
pub mod validation;

pub use error::{CoreError, CoreResult};
pub use crate::tracing::{InstrumentationConfig, LogSink, init_tracing};
pub use validation::{ValidateConfig, validators};

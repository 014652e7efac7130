//! Shared tracing functionality for Gatekeeper
//!
//! Log output from every component is routed through a [`LogSink`], which
//! mirrors it to stdout, a backing file, and an in-memory buffer that the
//! control surface can serve back to an operator.

pub mod config;
pub mod init;
pub mod log_sink;

pub use config::InstrumentationConfig;
pub use init::init_tracing;
pub use log_sink::LogSink;

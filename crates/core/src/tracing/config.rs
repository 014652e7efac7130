//! Logging settings handed to [`init_tracing`](super::init_tracing)

/// Service identity and default verbosity of the process log
#[derive(Debug, Clone)]
pub struct InstrumentationConfig {
    pub service_name: String,
    pub service_version: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset or invalid
    pub log_level: String,
}

impl InstrumentationConfig {
    pub fn for_service(service_name: impl Into<String>, log_level: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: log_level.into(),
        }
    }
}

//! Settings validation
//!
//! Validators return `ConfigError::Message` naming the offending field so a
//! bad settings file fails startup with a message the operator can act on.

use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Settings that can check themselves after deserialization
pub trait ValidateConfig: Serialize + for<'de> Deserialize<'de> {
    fn validate(&self) -> Result<(), ConfigError>;
}

fn invalid(field: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Message(format!("{field}: {reason}"))
}

/// Field validators shared by settings types
pub mod validators {
    use super::invalid;
    use config::ConfigError;
    use std::net::{IpAddr, SocketAddr};

    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
        Ok(())
    }

    /// `host:port` with a literal IP, e.g. `0.0.0.0:33890`
    pub fn validate_socket_addr(value: &str, field: &str) -> Result<(), ConfigError> {
        value
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| invalid(field, format_args!("'{value}' is not a socket address ({e})")))
    }

    /// Literal IPv4 or IPv6 address
    pub fn validate_ip_addr(value: &str, field: &str) -> Result<(), ConfigError> {
        value
            .parse::<IpAddr>()
            .map(|_| ())
            .map_err(|e| invalid(field, format_args!("'{value}' is not an IP address ({e})")))
    }

    /// Absolute http(s) URL
    pub fn validate_url(value: &str, field: &str) -> Result<(), ConfigError> {
        let url = url::Url::parse(value)
            .map_err(|e| invalid(field, format_args!("'{value}' is not a URL ({e})")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(field, "must use http or https"));
        }
        Ok(())
    }

    /// `local@domain` with both parts present
    pub fn validate_email(value: &str, field: &str) -> Result<(), ConfigError> {
        match value.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(())
            }
            _ => Err(invalid(field, format_args!("'{value}' is not an email address"))),
        }
    }

    /// Inclusive range check
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(invalid(field, format_args!("{value} is outside {min}..={max}")));
        }
        Ok(())
    }

    pub fn validate_log_level(value: &str, field: &str) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&value) {
            return Err(invalid(field, format_args!("'{value}' is not one of {LEVELS:?}")));
        }
        Ok(())
    }
}

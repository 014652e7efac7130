//! Gatekeeper configuration

use crate::error::{GatekeeperError, Result};
use config::{Case, Config, ConfigError, Environment, File, FileFormat};
use gatekeeper_core::{ValidateConfig, validators};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Prefix for environment overrides, e.g. `GATEKEEPER__PROXYADDRESS`
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Gatekeeper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Address the relay listens on
    #[serde(default = "default_proxy_address")]
    pub proxy_address: String,
    /// Backend every authorized connection is relayed to
    #[serde(default = "default_redirect_address")]
    pub redirect_address: String,
    /// Address of the control surface
    #[serde(default = "default_api_address")]
    pub api_address: String,
    /// Log file mirrored by the log route
    #[serde(default = "default_logger_path")]
    pub logger_path: PathBuf,
    /// Public base URL of the control surface, used in confirmation links
    #[serde(default = "default_api_url")]
    pub default_api_url: String,
    /// Addresses allowed to call the control surface; empty admits everyone
    #[serde(default)]
    pub api_whitelist: Vec<String>,
    /// Notification recipients
    #[serde(default)]
    pub emails: Vec<String>,
    /// Persisted relay allow-list
    #[serde(default = "default_whitelist_path")]
    pub whitelist_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend dial timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Mail relay; notifications go to the log when absent
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// SMTP relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender mailbox, e.g. `Gatekeeper <gatekeeper@example.com>`
    pub from: String,
}

fn default_proxy_address() -> String {
    "0.0.0.0:33890".to_string()
}

fn default_redirect_address() -> String {
    "127.0.0.1:3389".to_string()
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_logger_path() -> PathBuf {
    PathBuf::from("gatekeeper.log")
}

fn default_api_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_whitelist_path() -> PathBuf {
    PathBuf::from("whitelist.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_address: default_proxy_address(),
            redirect_address: default_redirect_address(),
            api_address: default_api_address(),
            logger_path: default_logger_path(),
            default_api_url: default_api_url(),
            api_whitelist: Vec::new(),
            emails: Vec::new(),
            whitelist_path: default_whitelist_path(),
            log_level: default_log_level(),
            connect_timeout_secs: default_connect_timeout(),
            smtp: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, then apply `GATEKEEPER__*` overrides and validate
    ///
    /// A missing JSON file is first created with the default settings.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = file_format(path);

        if !path.exists() {
            if format != FileFormat::Json {
                return Err(ConfigError::NotFound(path.display().to_string()).into());
            }
            write_default(path)?;
        }

        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path).format(format))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .convert_case(Case::Camel)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        _ => FileFormat::Json,
    }
}

fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut encoded = serde_json::to_string_pretty(&Settings::default())
        .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    encoded.push('\n');
    std::fs::write(path, encoded).map_err(|e| GatekeeperError::storage(path, e))?;

    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}

impl ValidateConfig for Settings {
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        validators::validate_socket_addr(&self.proxy_address, "proxyAddress")?;
        validators::validate_not_empty(&self.redirect_address, "redirectAddress")?;
        validators::validate_socket_addr(&self.api_address, "apiAddress")?;
        validators::validate_not_empty(&self.logger_path.to_string_lossy(), "loggerPath")?;
        validators::validate_url(&self.default_api_url, "defaultApiUrl")?;
        validators::validate_not_empty(&self.whitelist_path.to_string_lossy(), "whitelistPath")?;
        validators::validate_log_level(&self.log_level, "logLevel")?;
        validators::validate_range(self.connect_timeout_secs, 1, 300, "connectTimeoutSecs")?;

        for ip in &self.api_whitelist {
            validators::validate_ip_addr(ip, "apiWhitelist")?;
        }

        for email in &self.emails {
            validators::validate_email(email, "emails")?;
        }

        if let Some(smtp) = &self.smtp {
            validators::validate_not_empty(&smtp.host, "smtp.host")?;
            validators::validate_range(smtp.port, 1, u16::MAX, "smtp.port")?;
            validators::validate_not_empty(&smtp.from, "smtp.from")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let settings = Settings::load_from_file(&path).unwrap();

        assert!(path.exists());
        assert_eq!(settings.proxy_address, "0.0.0.0:33890");
        assert_eq!(settings.redirect_address, "127.0.0.1:3389");
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
        assert!(settings.smtp.is_none());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["defaultApiUrl"], "http://localhost:8080/api");
    }

    #[test]
    fn test_camel_case_file_is_loaded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "proxyAddress": "0.0.0.0:4000",
                "redirectAddress": "10.1.1.1:3389",
                "apiAddress": "127.0.0.1:9000",
                "loggerPath": "logs/gate.log",
                "defaultApiUrl": "https://gate.example.com/api",
                "apiWhitelist": ["127.0.0.1"],
                "emails": ["ops@example.com"],
                "smtp": {
                    "host": "smtp.example.com",
                    "username": "gate",
                    "password": "secret",
                    "from": "Gatekeeper <gate@example.com>"
                }
            }"#,
        )
        .unwrap();

        let settings = Settings::load_from_file(&path).unwrap();

        assert_eq!(settings.proxy_address, "0.0.0.0:4000");
        assert_eq!(settings.redirect_address, "10.1.1.1:3389");
        assert_eq!(settings.logger_path, PathBuf::from("logs/gate.log"));
        assert_eq!(settings.api_whitelist, vec!["127.0.0.1".to_string()]);
        assert_eq!(settings.emails, vec!["ops@example.com".to_string()]);
        assert_eq!(settings.whitelist_path, PathBuf::from("whitelist.json"));
        assert_eq!(settings.smtp.unwrap().port, 587);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut settings = Settings {
            proxy_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.proxy_address = default_proxy_address();
        settings.emails = vec!["nobody".to_string()];
        assert!(settings.validate().is_err());

        settings.emails.clear();
        settings.api_whitelist = vec!["localhost".to_string()];
        assert!(settings.validate().is_err());

        settings.api_whitelist.clear();
        settings.connect_timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_toml_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let err = Settings::load_from_file(&path).unwrap_err();

        assert!(matches!(err, GatekeeperError::Config(_)));
        assert!(!path.exists());
    }
}

//! Access-gated TCP relay
//!
//! Inbound connections are relayed to a fixed backend only when the caller's
//! IP is on the persisted allow-list. Unknown callers are turned away and
//! trigger an email confirmation; redeeming the emailed code through the
//! control surface allow-lists the IP.

pub mod allowlist;
pub mod api;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod registry;
pub mod relay;

pub use allowlist::AllowList;
pub use auth::{PendingCodes, RedeemOutcome, StepUpAuthenticator};
pub use config::{Settings, SmtpConfig};
pub use dispatcher::{ConnectionOutcome, ProxyConfig, ProxyServer};
pub use error::{GatekeeperError, Result};
pub use notify::{LogNotifier, Notification, Notifier, SmtpNotifier};
pub use registry::{ConnectionRegistry, RegistryEntry};
pub use relay::{Relay, RelayState, RelayStats};

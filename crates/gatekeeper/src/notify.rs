//! Outbound notification of access attempts

use crate::config::SmtpConfig;
use crate::error::{GatekeeperError, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

/// One addressed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers batches of notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver every message in `batch`; the first failure aborts the batch
    async fn deliver(&self, batch: Vec<Notification>) -> Result<()>;
}

/// Local machine name, used to tell operators which host is being accessed
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Notifier that only writes messages to the log
///
/// Used when no mail relay is configured, so an operator watching the log
/// can still follow the confirmation link.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, batch: Vec<Notification>) -> Result<()> {
        for notification in batch {
            warn!(
                to = %notification.to,
                subject = %notification.subject,
                "access notification (no mail relay configured):\n{}",
                notification.body
            );
        }
        Ok(())
    }
}

/// Notifier sending mail through an SMTP relay over STARTTLS
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config.from.parse().map_err(|e| {
            GatekeeperError::Delivery(format!("invalid sender {}: {e}", config.from))
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| GatekeeperError::Delivery(format!("invalid relay {}: {e}", config.host)))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        info!(host = %config.host, port = config.port, "using SMTP notifier");
        Ok(Self { transport, from })
    }

    fn build_message(&self, notification: Notification) -> Result<Message> {
        let to: Mailbox = notification.to.parse().map_err(|e| {
            GatekeeperError::Delivery(format!("invalid recipient {}: {e}", notification.to))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject)
            .body(notification.body)
            .map_err(|e| GatekeeperError::Delivery(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn deliver(&self, batch: Vec<Notification>) -> Result<()> {
        // Build everything first so a bad address sends nothing
        let messages = batch
            .into_iter()
            .map(|notification| self.build_message(notification))
            .collect::<Result<Vec<_>>>()?;

        for message in messages {
            self.transport
                .send(message)
                .await
                .map_err(|e| GatekeeperError::Delivery(e.to_string()))?;
        }
        Ok(())
    }
}

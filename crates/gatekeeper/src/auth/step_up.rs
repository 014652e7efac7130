//! Email step-up authentication
//!
//! An address not on the allow-list is turned away, and the first such
//! attempt mints a single-use code and mails a confirmation link to the
//! operators. Redeeming the code adds the address to the allow-list, so
//! the next attempt from it is let through.

use crate::allowlist::AllowList;
use crate::auth::codes::PendingCodes;
use crate::error::Result;
use crate::notify::{Notification, Notifier};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of a redemption attempt, rendered verbatim on the control surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// The code was valid and its IP is now allow-listed
    Success,
    /// No pending code matches
    InvalidCode,
    /// The request carried an empty code
    MissingCode,
    /// The code was consumed but the allow-list update failed
    Failed(String),
}

impl fmt::Display for RedeemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedeemOutcome::Success => f.write_str("success"),
            RedeemOutcome::InvalidCode => f.write_str("invalid code"),
            RedeemOutcome::MissingCode => f.write_str("you must enter a code"),
            RedeemOutcome::Failed(detail) => write!(f, "error: {detail}"),
        }
    }
}

/// Decides whether an IP may use the relay and drives the confirmation flow
pub struct StepUpAuthenticator {
    allowlist: Arc<AllowList>,
    codes: PendingCodes,
    notifier: Arc<dyn Notifier>,
    recipients: Vec<String>,
    public_url: String,
    hostname: String,
}

impl StepUpAuthenticator {
    pub fn new(
        allowlist: Arc<AllowList>,
        notifier: Arc<dyn Notifier>,
        recipients: Vec<String>,
        public_url: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self::with_codes(
            allowlist,
            PendingCodes::new(),
            notifier,
            recipients,
            public_url,
            hostname,
        )
    }

    /// Authenticator backed by a caller-supplied code table
    pub fn with_codes(
        allowlist: Arc<AllowList>,
        codes: PendingCodes,
        notifier: Arc<dyn Notifier>,
        recipients: Vec<String>,
        public_url: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            allowlist,
            codes,
            notifier,
            recipients,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            hostname: hostname.into(),
        }
    }

    pub fn allowlist(&self) -> &Arc<AllowList> {
        &self.allowlist
    }

    pub fn codes(&self) -> &PendingCodes {
        &self.codes
    }

    /// Whether `ip` may be relayed right now
    ///
    /// An allow-listed IP passes. Otherwise the attempt is refused; if no
    /// code is outstanding for `ip` one is issued and the operators are
    /// notified on a detached task. The verdict never waits on delivery.
    pub async fn verdict(self: &Arc<Self>, ip: &str) -> bool {
        if self.allowlist.contains(ip).await {
            return true;
        }

        let issued = {
            let mut pending = self.codes.lock().await;
            // A redemption may have landed since the check above
            if self.allowlist.contains(ip).await {
                return true;
            }
            pending.issue_if_absent(ip)
        };

        let code = match issued {
            Ok(Some(code)) => code,
            Ok(None) => {
                info!(ip = %ip, "confirmation already pending");
                return false;
            }
            Err(e) => {
                error!(ip = %ip, "failed to issue confirmation code: {}", e);
                return false;
            }
        };

        info!(ip = %ip, "issued confirmation code, notifying operators");
        let auth = Arc::clone(self);
        let ip = ip.to_string();
        tokio::spawn(async move {
            if let Err(e) = auth.notify(&ip, &code).await {
                error!(ip = %ip, "failed to notify operators: {}", e);
            }
        });

        false
    }

    /// Issue a fresh code for `ip` without notifying anyone
    pub async fn issue_code(&self, ip: &str) -> Result<String> {
        self.codes.issue(ip).await
    }

    /// Confirmation link for `code`
    pub fn confirmation_link(&self, code: &str) -> String {
        format!("{}/authenticate?code={}", self.public_url, code)
    }

    /// Mail one confirmation message per recipient for `ip`
    pub async fn notify(&self, ip: &str, code: &str) -> Result<()> {
        if self.recipients.is_empty() {
            warn!(ip = %ip, "no notification recipients configured");
            return Ok(());
        }

        let subject = format!("Access attempt on machine: {}", self.hostname);
        let body = format!(
            "Login attempt from {ip}.\nClick below to verify this IP.\n\n{}",
            self.confirmation_link(code)
        );

        let batch = self
            .recipients
            .iter()
            .map(|to| Notification {
                to: to.clone(),
                subject: subject.clone(),
                body: body.clone(),
            })
            .collect();

        self.notifier.deliver(batch).await
    }

    /// Consume `code` and allow-list the IP it was issued for
    pub async fn redeem(&self, code: &str) -> RedeemOutcome {
        if code.is_empty() {
            return RedeemOutcome::MissingCode;
        }

        // The table stays locked until the allow-list holds the IP, so a
        // concurrent verdict sees either the code or the entry
        let mut pending = self.codes.lock().await;
        let Some(ip) = pending.redeem(code) else {
            return RedeemOutcome::InvalidCode;
        };
        let added = self.allowlist.add(&ip).await;
        drop(pending);

        match added {
            Ok(()) => {
                info!(ip = %ip, "confirmation redeemed, address allow-listed");
                RedeemOutcome::Success
            }
            Err(e) => {
                warn!(ip = %ip, "confirmation redeemed but allow-list update failed: {}", e);
                RedeemOutcome::Failed(e.to_string())
            }
        }
    }
}

//! Single-use confirmation codes awaiting redemption

use crate::error::Result;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Number of random bytes behind each code (256 bits)
pub const CODE_BYTES: usize = 32;

type CodeGenerator = Box<dyn Fn() -> Result<String> + Send + Sync>;

/// Generate a fresh code from the operating system entropy source
pub fn generate_code() -> Result<String> {
    let mut random_bytes = [0u8; CODE_BYTES];
    OsRng.try_fill_bytes(&mut random_bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(random_bytes))
}

#[derive(Default)]
struct Table {
    by_code: HashMap<String, String>,
    by_ip: HashMap<String, String>,
}

impl Table {
    fn insert(&mut self, generator: &CodeGenerator, ip: &str) -> Result<String> {
        let code = loop {
            let candidate = generator()?;
            if !self.by_code.contains_key(&candidate) {
                break candidate;
            }
            warn!("generated code collided with a pending code, retrying");
        };

        self.by_code.insert(code.clone(), ip.to_string());
        self.by_ip.insert(ip.to_string(), code.clone());
        Ok(code)
    }
}

/// Table of pending codes, each resolving to the IP waiting on approval
///
/// Both directions of the mapping live behind one lock so a code and its
/// reverse entry are always added and removed together.
pub struct PendingCodes {
    table: Mutex<Table>,
    generator: CodeGenerator,
}

impl Default for PendingCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCodes {
    pub fn new() -> Self {
        Self::with_generator(generate_code)
    }

    /// Table drawing codes from `generator` instead of the OS entropy source
    pub fn with_generator<F>(generator: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        Self {
            table: Mutex::new(Table::default()),
            generator: Box::new(generator),
        }
    }

    /// Hold the table for a multi-step update
    ///
    /// Callers that must check other state between reading and changing
    /// the table keep the guard across that check.
    pub async fn lock(&self) -> PendingGuard<'_> {
        PendingGuard {
            table: self.table.lock().await,
            generator: &self.generator,
        }
    }

    /// Issue a code for `ip` unless one is already outstanding
    ///
    /// Returns `None` when `ip` already has a pending code.
    pub async fn issue_if_absent(&self, ip: &str) -> Result<Option<String>> {
        self.lock().await.issue_if_absent(ip)
    }

    /// Issue a code for `ip` unconditionally
    ///
    /// Any earlier code for `ip` stays valid; the reverse index tracks the newest.
    pub async fn issue(&self, ip: &str) -> Result<String> {
        let mut table = self.table.lock().await;
        table.insert(&self.generator, ip)
    }

    /// Whether some code is waiting on `ip`
    pub async fn has_pending_ip(&self, ip: &str) -> bool {
        self.table.lock().await.by_ip.contains_key(ip)
    }

    /// Remove `code`, returning the IP it was issued for
    pub async fn redeem(&self, code: &str) -> Option<String> {
        self.lock().await.redeem(code)
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.table.lock().await.by_code.contains_key(code)
    }

    /// Number of outstanding codes
    pub async fn len(&self) -> usize {
        self.table.lock().await.by_code.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.by_code.is_empty()
    }
}

/// Exclusive access to the code table
pub struct PendingGuard<'a> {
    table: MutexGuard<'a, Table>,
    generator: &'a CodeGenerator,
}

impl PendingGuard<'_> {
    /// Same as [`PendingCodes::issue_if_absent`], under the held lock
    pub fn issue_if_absent(&mut self, ip: &str) -> Result<Option<String>> {
        if self.table.by_ip.contains_key(ip) {
            return Ok(None);
        }
        self.table.insert(self.generator, ip).map(Some)
    }

    /// Same as [`PendingCodes::redeem`], under the held lock
    pub fn redeem(&mut self, code: &str) -> Option<String> {
        let ip = self.table.by_code.remove(code)?;
        if self.table.by_ip.get(&ip).is_some_and(|latest| latest == code) {
            self.table.by_ip.remove(&ip);
        }
        Some(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_generated_codes_are_url_safe_and_distinct() {
        let first = generate_code().unwrap();
        let second = generate_code().unwrap();

        // 32 bytes unpadded base64
        assert_eq!(first.len(), 43);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_issue_if_absent_deduplicates_by_ip() {
        let codes = PendingCodes::new();

        let code = codes.issue_if_absent("10.0.0.5").await.unwrap();
        assert!(code.is_some());
        assert!(codes.issue_if_absent("10.0.0.5").await.unwrap().is_none());
        assert!(codes.issue_if_absent("10.0.0.6").await.unwrap().is_some());

        assert_eq!(codes.len().await, 2);
        assert!(codes.has_pending_ip("10.0.0.5").await);
    }

    #[tokio::test]
    async fn test_redeem_is_single_use() {
        let codes = PendingCodes::new();
        let code = codes.issue("10.0.0.5").await.unwrap();

        assert_eq!(codes.redeem(&code).await.as_deref(), Some("10.0.0.5"));
        assert_eq!(codes.redeem(&code).await, None);
        assert!(!codes.has_pending_ip("10.0.0.5").await);
        assert!(codes.is_empty().await);
    }

    #[tokio::test]
    async fn test_collision_draws_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        // Yields "a", "a", "b": the second issue must skip the duplicate
        let codes = PendingCodes::with_generator(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(if n < 2 { "a" } else { "b" }.to_string())
        });

        assert_eq!(codes.issue("10.0.0.5").await.unwrap(), "a");
        assert_eq!(codes.issue("10.0.0.6").await.unwrap(), "b");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(codes.redeem("a").await.as_deref(), Some("10.0.0.5"));
        assert_eq!(codes.redeem("b").await.as_deref(), Some("10.0.0.6"));
    }

    #[tokio::test]
    async fn test_older_code_keeps_newer_reverse_entry() {
        let codes = PendingCodes::new();
        let older = codes.issue("10.0.0.5").await.unwrap();
        let newer = codes.issue("10.0.0.5").await.unwrap();

        codes.redeem(&older).await.unwrap();
        assert!(codes.has_pending_ip("10.0.0.5").await);

        codes.redeem(&newer).await.unwrap();
        assert!(!codes.has_pending_ip("10.0.0.5").await);
    }
}

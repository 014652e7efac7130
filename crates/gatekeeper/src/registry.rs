//! Bookkeeping of active relayed connections

use crate::relay::Relay;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Entry in the connection registry
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Registry-assigned connection id
    pub id: u64,
    /// Remote endpoint of the inbound connection
    pub peer_addr: SocketAddr,
    /// When the relay was registered
    pub connected_at: DateTime<Utc>,
    /// Relay piping this connection
    pub relay: Arc<Relay>,
}

/// Registry of currently piped connections
///
/// Introspection only; never consulted for authorization.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<u64, RegistryEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relay for the connection from `peer_addr`, returning its id
    pub async fn register(&self, peer_addr: SocketAddr, relay: Arc<Relay>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = RegistryEntry {
            id,
            peer_addr,
            connected_at: Utc::now(),
            relay,
        };

        let mut entries = self.entries.write().await;
        entries.insert(id, entry);
        debug!(connection_id = id, active = entries.len(), "registered relay");
        id
    }

    /// Remove a connection; unknown ids are ignored
    pub async fn unregister(&self, id: u64) {
        let mut entries = self.entries.write().await;
        if entries.remove(&id).is_some() {
            debug!(connection_id = id, active = entries.len(), "unregistered relay");
        }
    }

    /// Get all active connections, oldest first
    pub async fn list_all(&self) -> Vec<RegistryEntry> {
        let entries = self.entries.read().await;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|entry| entry.id);
        all
    }

    /// Terminate every registered relay
    pub async fn stop_all(&self) {
        let entries = self.entries.read().await;
        for entry in entries.values() {
            entry.relay.stop();
        }
    }

    /// Get the number of active connections
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

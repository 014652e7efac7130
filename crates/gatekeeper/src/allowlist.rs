//! Persisted IP allow-list
//!
//! The list lives in a JSON file holding an array of IP strings. Every
//! mutation rewrites the whole file through a temporary sibling that is
//! renamed over the original, so a crash mid-write leaves either the old
//! or the new list on disk.

use crate::error::{GatekeeperError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Set of IP addresses permitted to use the relay without a challenge
pub struct AllowList {
    path: PathBuf,
    entries: RwLock<Vec<String>>,
}

impl AllowList {
    /// Load the allow-list from `path`, creating it with an empty list when absent
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        create_if_absent(&path).await?;

        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| GatekeeperError::storage(&path, e))?;
        let decoded: Vec<String> =
            serde_json::from_slice(&raw).map_err(|source| GatekeeperError::Decode {
                path: path.clone(),
                source,
            })?;

        let mut entries = Vec::with_capacity(decoded.len());
        for ip in decoded {
            if entries.contains(&ip) {
                warn!(ip = %ip, path = %path.display(), "dropping duplicate allow-list entry");
                continue;
            }
            entries.push(ip);
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "loaded allow-list"
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Whether `ip` is on the list (exact string match)
    pub async fn contains(&self, ip: &str) -> bool {
        self.entries.read().await.iter().any(|entry| entry == ip)
    }

    /// Append `ip` and persist the list
    ///
    /// If persisting fails the entry stays in memory and the storage error
    /// is returned.
    pub async fn add(&self, ip: &str) -> Result<()> {
        let mut entries = self.entries.write().await;

        if entries.iter().any(|entry| entry == ip) {
            return Err(GatekeeperError::Conflict(ip.to_string()));
        }

        entries.push(ip.to_string());
        debug!(ip = %ip, entries = entries.len(), "added allow-list entry");

        self.persist(&entries).await
    }

    /// Remove `ip` and persist the list, with the same failure semantics as [`AllowList::add`]
    pub async fn remove(&self, ip: &str) -> Result<()> {
        let mut entries = self.entries.write().await;

        let index = entries
            .iter()
            .position(|entry| entry == ip)
            .ok_or_else(|| GatekeeperError::NotFound(ip.to_string()))?;

        // Order carries no meaning
        entries.swap_remove(index);
        debug!(ip = %ip, entries = entries.len(), "removed allow-list entry");

        self.persist(&entries).await
    }

    /// Snapshot of the current entries
    pub async fn entries(&self) -> Vec<String> {
        self.entries.read().await.clone()
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the list has no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, entries: &[String]) -> Result<()> {
        let mut encoded = serde_json::to_vec(entries).map_err(|source| GatekeeperError::Decode {
            path: self.path.clone(),
            source,
        })?;
        encoded.push(b'\n');

        write_replace(&self.path, &encoded).await
    }
}

async fn create_if_absent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| GatekeeperError::storage(parent, e))?;
    }

    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;

    match created {
        Ok(mut file) => {
            file.write_all(b"[]")
                .await
                .map_err(|e| GatekeeperError::storage(path, e))?;
            file.sync_all()
                .await
                .map_err(|e| GatekeeperError::storage(path, e))?;
            info!(path = %path.display(), "created empty allow-list");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(GatekeeperError::storage(path, e)),
    }
}

/// Write `contents` to a temporary sibling of `path`, then rename it into place
async fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| GatekeeperError::storage(&tmp_path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| GatekeeperError::storage(&tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| GatekeeperError::storage(&tmp_path, e))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| GatekeeperError::storage(path, e))
}

//! Storage view handed to a backend at setup.
//!
//! Inside a plugin process the backend's storage is a
//! [`RemoteStorage`](crate::plugin::RemoteStorage) that calls back to the
//! host over the plugin connection; the host serves whatever storage it passed
//! to `setup`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;

/// A single stored key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key/value storage available to a backend.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// List the keys directly under `prefix`. Deeper keys are folded into
    /// their first path segment with a trailing `/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>>;

    async fn put(&self, entry: StorageEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory storage, used by hosts that keep no persistent state and by
/// tests.
#[derive(Debug, Default)]
pub struct InmemStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InmemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for InmemStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let child = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if keys.last().map(String::as_str) != Some(child) {
                keys.push(child.to_string());
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .map(|value| StorageEntry::new(key, value.clone())))
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        self.entries.write().await.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

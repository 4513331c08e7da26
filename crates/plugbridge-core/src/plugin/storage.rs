//! Storage over the plugin connection.
//!
//! The host keeps the storage it passed to `setup`; the plugin reaches it by
//! calling `Storage.*` methods back over the same connection. [`HostServices`]
//! is the host-side dispatcher for those calls and [`RemoteStorage`] is the
//! plugin-side `Storage` issuing them.

use super::wire::{self, method, StorageKeyArgs, StorageListArgs, StoragePutArgs};
use crate::error::{BridgeError, Result};
use crate::ipc::{InboundCall, IpcDispatch, IpcPeer};
use crate::lifecycle::LifecycleState;
use crate::logical::{Storage, StorageEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Plugin-side storage that forwards to the host.
#[derive(Debug, Clone)]
pub struct RemoteStorage {
    peer: IpcPeer,
}

impl RemoteStorage {
    pub fn new(peer: IpcPeer) -> Self {
        Self { peer }
    }

    async fn call<A: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        args: &A,
    ) -> Result<R> {
        let reply = self.peer.call(method, wire::encode(args)?).await?;
        wire::decode_reply(method, reply)
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let args = StorageListArgs {
            prefix: prefix.to_string(),
        };
        self.call(method::STORAGE_LIST, &args).await
    }

    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let args = StorageKeyArgs {
            key: key.to_string(),
        };
        self.call(method::STORAGE_GET, &args).await
    }

    async fn put(&self, entry: StorageEntry) -> Result<()> {
        self.call(method::STORAGE_PUT, &StoragePutArgs { entry }).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let args = StorageKeyArgs {
            key: key.to_string(),
        };
        self.call(method::STORAGE_DELETE, &args).await
    }
}

/// Host-side services a plugin may call back into.
///
/// Storage becomes available when the backend is set up and goes away at
/// cleanup.
#[derive(Debug, Default)]
pub struct HostServices {
    storage: RwLock<Option<Arc<dyn Storage>>>,
}

impl HostServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, storage: Arc<dyn Storage>) {
        *self.storage.write().unwrap_or_else(PoisonError::into_inner) = Some(storage);
    }

    pub fn clear(&self) {
        self.storage
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn storage(&self, method: &str) -> Result<Arc<dyn Storage>> {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::lifecycle(method, LifecycleState::Uninitialized))
    }
}

#[async_trait]
impl IpcDispatch for HostServices {
    async fn dispatch(&self, method: &str, params: Value, _call: InboundCall) -> Result<Value> {
        match method {
            method::STORAGE_LIST => {
                let args: StorageListArgs = wire::decode_params(method, params)?;
                let keys = self.storage(method)?.list(&args.prefix).await?;
                wire::encode(&keys)
            }
            method::STORAGE_GET => {
                let args: StorageKeyArgs = wire::decode_params(method, params)?;
                let entry = self.storage(method)?.get(&args.key).await?;
                wire::encode(&entry)
            }
            method::STORAGE_PUT => {
                let args: StoragePutArgs = wire::decode_params(method, params)?;
                debug!("Plugin storage put {}", args.entry.key);
                self.storage(method)?.put(args.entry).await?;
                Ok(Value::Null)
            }
            method::STORAGE_DELETE => {
                let args: StorageKeyArgs = wire::decode_params(method, params)?;
                self.storage(method)?.delete(&args.key).await?;
                Ok(Value::Null)
            }
            _ => Err(BridgeError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

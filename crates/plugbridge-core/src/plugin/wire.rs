//! Wire shapes of the plugin protocol.
//!
//! Every context-carrying call sends a [`ContextEnvelope`] next to its
//! arguments. Replies are plain JSON values of the logical types.

use crate::context::ContextEnvelope;
use crate::error::{BridgeError, Result};
use crate::logical::{InitializationRequest, Logger, Request, StaticSystemView, StorageEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Method names served by the plugin side.
pub mod method {
    pub const SETUP: &str = "Backend.Setup";
    pub const HANDLE_REQUEST: &str = "Backend.HandleRequest";
    pub const HANDLE_EXISTENCE_CHECK: &str = "Backend.HandleExistenceCheck";
    pub const SPECIAL_PATHS: &str = "Backend.SpecialPaths";
    pub const SYSTEM: &str = "Backend.System";
    pub const LOGGER: &str = "Backend.Logger";
    pub const CLEANUP: &str = "Backend.Cleanup";
    pub const INVALIDATE_KEY: &str = "Backend.InvalidateKey";
    pub const INITIALIZE: &str = "Backend.Initialize";

    // Served by the host for the plugin's storage view
    pub const STORAGE_LIST: &str = "Storage.List";
    pub const STORAGE_GET: &str = "Storage.Get";
    pub const STORAGE_PUT: &str = "Storage.Put";
    pub const STORAGE_DELETE: &str = "Storage.Delete";
}

/// The serializable part of a `BackendConfig`. Storage is not sent; the
/// plugin reaches it through the reverse channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfigWire {
    pub logger: Logger,
    pub system: StaticSystemView,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupArgs {
    pub context: ContextEnvelope,
    pub config: BackendConfigWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestArgs {
    pub context: ContextEnvelope,
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeArgs {
    pub context: ContextEnvelope,
    #[serde(default)]
    pub request: InitializationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateKeyArgs {
    pub context: ContextEnvelope,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupArgs {
    pub context: ContextEnvelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageKeyArgs {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageListArgs {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePutArgs {
    pub entry: StorageEntry,
}

/// Decode inbound call parameters.
pub fn decode_params<T: DeserializeOwned>(method: &str, params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| BridgeError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}

/// Decode the reply to an outbound call.
pub fn decode_reply<T: DeserializeOwned>(method: &str, reply: serde_json::Value) -> Result<T> {
    serde_json::from_value(reply).map_err(|e| BridgeError::Decode {
        message: format!("Unexpected {} reply: {}", method, e),
    })
}

/// Encode call arguments or a reply.
pub fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| BridgeError::Encode {
        message: e.to_string(),
    })
}

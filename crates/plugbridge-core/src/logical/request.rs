//! Requests routed to a logical backend.

use super::value::{Map, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The kind of operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Patch,
    Delete,
    List,
    Help,
    AliasLookahead,
    ResolveRole,
    Revoke,
    Renew,
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Help => "help",
            Operation::AliasLookahead => "alias-lookahead",
            Operation::ResolveRole => "resolve-role",
            Operation::Revoke => "revoke",
            Operation::Renew => "renew",
            Operation::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against a backend path.
///
/// Optional fields distinguish "not sent" (`None`) from "sent empty"
/// (`Some` of an empty collection); both survive the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID, generated on construction.
    pub id: String,
    pub operation: Operation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    /// Size in bytes of the frame the request arrived in, when it crossed a
    /// process boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_size: Option<u64>,
}

impl Request {
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            path: path.into(),
            data: None,
            headers: None,
            mount_point: None,
            wire_size: None,
        }
    }

    pub fn with_data(mut self, data: Map) -> Self {
        self.data = Some(data);
        self
    }

    /// Add a single data field, creating the map if needed.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, Vec<String>>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    /// Look up a data field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    /// Look up a string data field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// Request passed to `Initialize` when a backend leaves the configured phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializationRequest {
    /// Optional parameters for backend-internal priming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map>,
}

//! Responses returned by a logical backend.

use super::value::{Map, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lease information attached to a response that hands out a secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub lease_id: String,
    pub ttl: Duration,
    pub renewable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_data: Option<Map>,
}

/// Authentication result attached to a login response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub ttl: Duration,
    pub renewable: bool,
}

/// A backend response.
///
/// Every field is optional, and `Some(empty)` is kept distinct from `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl Response {
    /// Build a response carrying only data.
    pub fn with_data(data: Map) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Build a response with a single data field.
    pub fn with_field(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut data = Map::new();
        data.insert(key.into(), value.into());
        Self::with_data(data)
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.get_or_insert_with(Vec::new).push(warning.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(resp: &Response) -> Response {
        serde_json::from_str(&serde_json::to_string(resp).unwrap()).unwrap()
    }

    #[test]
    fn test_full_response_roundtrip() {
        let mut resp = Response::with_field("value", "bar");
        resp.add_warning("deprecated field");
        resp.secret = Some(Secret {
            lease_id: "kv/foo/123".into(),
            ttl: Duration::from_secs(300),
            renewable: true,
            internal_data: Some(Map::new()),
        });
        resp.auth = Some(Auth {
            client_token: "s.token".into(),
            policies: vec!["default".into()],
            ttl: Duration::from_secs(1800),
            ..Default::default()
        });

        assert_eq!(roundtrip(&resp), resp);
    }

    #[test]
    fn test_empty_warnings_distinct_from_absent() {
        let absent = Response::default();
        let empty = Response {
            warnings: Some(Vec::new()),
            data: Some(Map::new()),
            ..Default::default()
        };

        assert_eq!(roundtrip(&absent).warnings, None);
        assert_eq!(roundtrip(&absent).data, None);
        assert_eq!(roundtrip(&empty).warnings, Some(Vec::new()));
        assert_eq!(roundtrip(&empty).data, Some(Map::new()));
    }

    #[test]
    fn test_get_str() {
        let resp = Response::with_field("value", "bar");
        assert_eq!(resp.get_str("value"), Some("bar"));
        assert_eq!(Response::default().get_str("value"), None);
    }
}

//! Dynamically-typed payload values.
//!
//! Request and response data are maps from string keys to [`Value`]. The
//! encoding is plain JSON with two rules that keep it lossless:
//!
//! - integers and floats stay distinct (`1` vs `1.0`), and floats must be
//!   finite because JSON has no spelling for NaN or infinity;
//! - integers must fit in `i64`.
//!
//! Absence is expressed one level up, as `Option<Map>`, never as a value.

use crate::error::{BridgeError, Result};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// String-keyed mapping of dynamic values.
pub type Map = BTreeMap<String, Value>;

/// A dynamically-typed payload value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
}

impl Value {
    /// Convert any serializable value.
    ///
    /// Fails with `Encode` for shapes that have no lossless representation
    /// (non-string map keys, non-finite floats, integers beyond `i64`).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        let json = serde_json::to_value(value).map_err(|e| BridgeError::Encode {
            message: e.to_string(),
        })?;
        serde_json::from_value(json).map_err(|e| BridgeError::Encode {
            message: e.to_string(),
        })
    }

    /// Check that this value (recursively) can be encoded.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(BridgeError::Encode {
                message: format!("non-finite float {f} cannot be encoded"),
            }),
            Value::List(items) => items.iter().try_for_each(Value::validate),
            Value::Map(map) => map.values().try_for_each(Value::validate),
            _ => Ok(()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl<V: Into<Value>> FromIterator<V> for Value {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Value::List(iter.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(f) => Err(ser::Error::custom(format!(
                "non-finite float {f} cannot be encoded"
            ))),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, bool, number, list, map or null")
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        i64::try_from(u)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {u} exceeds the i64 range")))
    }

    fn visit_f64<E>(self, f: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }
        Ok(Value::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Value {
        let mut inner = Map::new();
        inner.insert("ttl".into(), Value::Int(300));
        inner.insert("ratio".into(), Value::Float(0.1));
        inner.insert("empty".into(), Value::Map(Map::new()));

        let mut outer = Map::new();
        outer.insert("value".into(), "bar".into());
        outer.insert("enabled".into(), true.into());
        outer.insert("nothing".into(), Value::Null);
        outer.insert("tags".into(), ["a", "b"].into_iter().collect());
        outer.insert("inner".into(), Value::Map(inner));
        Value::Map(outer)
    }

    #[test]
    fn test_nested_value_roundtrip() {
        let value = nested();
        let json = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_int_and_float_stay_distinct() {
        let json = serde_json::to_string(&Value::List(vec![Value::Int(1), Value::Float(1.0)]))
            .unwrap();
        assert_eq!(json, "[1,1.0]");
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Value::List(vec![Value::Int(1), Value::Float(1.0)]));
    }

    #[test]
    fn test_float_precision_survives() {
        let value = Value::Float(0.1 + 0.2);
        let parsed: Value = serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_non_finite_float_fails_encoding() {
        let value = Value::List(vec![Value::Float(f64::NAN)]);
        assert!(value.validate().is_err());
        let err = serde_json::to_string(&value).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_integer_out_of_range_fails_decoding() {
        let result: std::result::Result<Value, _> = serde_json::from_str("18446744073709551615");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_serialize_rejects_non_string_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], "x");
        let err = Value::from_serialize(&map).unwrap_err();
        assert!(matches!(err, BridgeError::Encode { .. }));
    }

    #[test]
    fn test_from_serialize_struct() {
        #[derive(Serialize)]
        struct Lease {
            id: String,
            ttl: u32,
        }
        let value = Value::from_serialize(&Lease {
            id: "abc".into(),
            ttl: 30,
        })
        .unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["id"].as_str(), Some("abc"));
        assert_eq!(map["ttl"].as_i64(), Some(30));
    }

    #[test]
    fn test_display_of_scalars() {
        assert_eq!(Value::from("bar").to_string(), "bar");
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::List(vec![]).to_string(), "<list>");
    }
}

//! Attribute maps merged from resource and span attributes.

mod value;

pub use value::{truncate, AttrValue};

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Semantic-convention keys the pipeline inspects.
pub const SERVICE_NAME: &str = "service.name";
pub const HOST_NAME: &str = "host.name";
pub const OTEL_LIBRARY_NAME: &str = "otel.library.name";
pub const OTEL_LIBRARY_VERSION: &str = "otel.library.version";
pub const RPC_SYSTEM: &str = "rpc.system";
pub const MESSAGING_SYSTEM: &str = "messaging.system";
pub const MESSAGING_OPERATION: &str = "messaging.operation";
pub const DB_SYSTEM: &str = "db.system";
pub const DB_STATEMENT: &str = "db.statement";
pub const DB_SQL_TABLE: &str = "db.sql.table";
pub const HTTP_ROUTE: &str = "http.route";
pub const HTTP_TARGET: &str = "http.target";
pub const LOG_MESSAGE: &str = "log.message";
pub const LOG_SEVERITY: &str = "log.severity";
pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";
pub const MESSAGE_TYPE: &str = "message.type";

/// Attribute map with unique keys; insertion order is not preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrMap(HashMap<String, AttrValue>);

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        AttrMap(HashMap::with_capacity(capacity))
    }

    /// Builds a map from OTLP key-value pairs, skipping unsupported kinds.
    pub fn from_key_values(kvs: &[KeyValue]) -> Self {
        let mut map = AttrMap::with_capacity(kvs.len());
        map.extend_from_key_values(kvs);
        map
    }

    /// Copies OTLP key-value pairs over this map, overwriting on collision.
    pub fn extend_from_key_values(&mut self, kvs: &[KeyValue]) {
        for kv in kvs {
            if let Some(value) = kv.value.as_ref().and_then(convert_any_value) {
                self.insert(kv.key.clone(), value);
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the attribute as text, or `""` when absent or not a string.
    pub fn text(&self, key: &str) -> &str {
        self.get(key).and_then(AttrValue::as_str).unwrap_or_default()
    }

    pub fn service_name(&self) -> &str {
        self.text(SERVICE_NAME)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }
}

fn convert_any_value(value: &AnyValue) -> Option<AttrValue> {
    match value.value.as_ref()? {
        any_value::Value::StringValue(s) => Some(AttrValue::Str(s.clone())),
        any_value::Value::BoolValue(b) => Some(AttrValue::Bool(*b)),
        any_value::Value::IntValue(v) => Some(AttrValue::Int(*v)),
        any_value::Value::DoubleValue(v) => Some(AttrValue::Float(*v)),
        any_value::Value::ArrayValue(array) => Some(convert_array(&array.values)),
        // Nested maps and raw bytes have no column representation.
        any_value::Value::KvlistValue(_) | any_value::Value::BytesValue(_) => None,
    }
}

/// Converts an OTLP array into the matching homogeneous array, falling back
/// to canonical string renderings when element types are mixed.
fn convert_array(values: &[AnyValue]) -> AttrValue {
    use any_value::Value;

    if values
        .iter()
        .all(|v| matches!(v.value, Some(Value::StringValue(_))))
    {
        return AttrValue::StrArray(
            values
                .iter()
                .filter_map(|v| match &v.value {
                    Some(Value::StringValue(s)) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        );
    }
    if values
        .iter()
        .all(|v| matches!(v.value, Some(Value::BoolValue(_))))
    {
        return AttrValue::BoolArray(
            values
                .iter()
                .filter_map(|v| match v.value {
                    Some(Value::BoolValue(b)) => Some(b),
                    _ => None,
                })
                .collect(),
        );
    }
    if values
        .iter()
        .all(|v| matches!(v.value, Some(Value::IntValue(_))))
    {
        return AttrValue::IntArray(
            values
                .iter()
                .filter_map(|v| match v.value {
                    Some(Value::IntValue(i)) => Some(i),
                    _ => None,
                })
                .collect(),
        );
    }
    if values
        .iter()
        .all(|v| matches!(v.value, Some(Value::DoubleValue(_))))
    {
        return AttrValue::FloatArray(
            values
                .iter()
                .filter_map(|v| match v.value {
                    Some(Value::DoubleValue(d)) => Some(d),
                    _ => None,
                })
                .collect(),
        );
    }

    AttrValue::StrArray(
        values
            .iter()
            .filter_map(convert_any_value)
            .map(|v| v.to_string())
            .collect(),
    )
}

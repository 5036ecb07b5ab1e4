//! Internal span model and its two columnar projections.

pub mod builder;
pub mod fingerprint;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attrs::{self, truncate, AttrMap};
use crate::storage::{Row, Value};

/// Table receiving the narrow, queryable projection.
pub const SPANS_INDEX_TABLE: &str = "spans_index";
/// Table receiving the wide payload projection.
pub const SPANS_DATA_TABLE: &str = "spans_data";

/// Longest stored attribute value in the index projection, in bytes.
pub const MAX_ATTR_VALUE_LEN: usize = 200;

/// Span kind, stored as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }

    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

/// Span status, stored as its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatusCode {
    Unset,
    Ok,
    Error,
}

impl SpanStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatusCode::Unset => "unset",
            SpanStatusCode::Ok => "ok",
            SpanStatusCode::Error => "error",
        }
    }

    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => SpanStatusCode::Ok,
            2 => SpanStatusCode::Error,
            _ => SpanStatusCode::Unset,
        }
    }
}

/// One unit of work in a trace, after normalization and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub project_id: u32,
    pub id: u64,
    pub parent_id: u64,
    pub trace_id: u128,
    pub name: String,
    pub kind: SpanKind,
    pub system: String,
    pub group_id: u64,
    pub time: DateTime<Utc>,
    /// Nanoseconds; zero when the wire end time precedes the start time.
    pub duration: u64,
    pub status_code: SpanStatusCode,
    pub status_message: String,
    pub attrs: AttrMap,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: u128,
    pub span_id: u64,
    pub attrs: AttrMap,
}

/// Narrow projection written to `spans_index`.
#[derive(Debug, Clone)]
pub struct SpanIndex {
    pub span: Span,
    pub count: u32,
    pub attr_keys: Vec<String>,
    pub attr_values: Vec<String>,
    pub service_name: String,
    pub host_name: String,
    pub event_count: u8,
    pub event_error_count: u8,
    pub event_log_count: u8,
}

impl SpanIndex {
    pub fn from_span(span: Span) -> Self {
        let (attr_keys, attr_values) = attr_keys_and_values(&span.attrs);
        let service_name = span.attrs.text(attrs::SERVICE_NAME).to_string();
        let host_name = span.attrs.text(attrs::HOST_NAME).to_string();
        let event_count = span.events.len().min(u8::MAX as usize) as u8;

        SpanIndex {
            span,
            count: 1,
            attr_keys,
            attr_values,
            service_name,
            host_name,
            event_count,
            // Reserved for event aggregation; not populated yet.
            event_error_count: 0,
            event_log_count: 0,
        }
    }

    pub fn to_row(&self) -> Row {
        let span = &self.span;
        let mut row = Row::new();

        row.insert("project_id".to_string(), Value::UInt64(span.project_id as u64));
        row.insert("trace_id".to_string(), Value::String(format_trace_id(span.trace_id)));
        row.insert("id".to_string(), Value::UInt64(span.id));
        row.insert("parent_id".to_string(), Value::UInt64(span.parent_id));
        row.insert("name".to_string(), Value::String(span.name.clone()));
        row.insert("kind".to_string(), Value::String(span.kind.as_str().to_string()));
        row.insert("system".to_string(), Value::String(span.system.clone()));
        row.insert("group_id".to_string(), Value::UInt64(span.group_id));
        row.insert("time".to_string(), Value::Timestamp(unix_nanos(span.time)));
        row.insert("duration".to_string(), Value::UInt64(span.duration));
        row.insert(
            "status_code".to_string(),
            Value::String(span.status_code.as_str().to_string()),
        );
        row.insert(
            "status_message".to_string(),
            Value::String(span.status_message.clone()),
        );
        row.insert("count".to_string(), Value::UInt64(self.count as u64));
        row.insert("attr_keys".to_string(), Value::StringArray(self.attr_keys.clone()));
        row.insert(
            "attr_values".to_string(),
            Value::StringArray(self.attr_values.clone()),
        );
        row.insert(
            "service_name".to_string(),
            Value::String(self.service_name.clone()),
        );
        row.insert("host_name".to_string(), Value::String(self.host_name.clone()));
        row.insert("event_count".to_string(), Value::UInt64(self.event_count as u64));
        row.insert(
            "event_error_count".to_string(),
            Value::UInt64(self.event_error_count as u64),
        );
        row.insert(
            "event_log_count".to_string(),
            Value::UInt64(self.event_log_count as u64),
        );

        row
    }
}

/// Wide projection written to `spans_data`.
#[derive(Debug, Clone)]
pub struct SpanData {
    pub trace_id: u128,
    pub id: u64,
    pub parent_id: u64,
    pub time: DateTime<Utc>,
    /// Canonical serialization of the full span.
    pub data: Vec<u8>,
}

impl SpanData {
    pub fn from_span(span: &Span) -> Self {
        SpanData {
            trace_id: span.trace_id,
            id: span.id,
            parent_id: span.parent_id,
            time: span.time,
            data: serde_json::to_vec(span).unwrap_or_default(),
        }
    }

    pub fn to_row(&self) -> Row {
        let mut row = Row::new();

        row.insert("trace_id".to_string(), Value::String(format_trace_id(self.trace_id)));
        row.insert("id".to_string(), Value::UInt64(self.id));
        row.insert("parent_id".to_string(), Value::UInt64(self.parent_id));
        row.insert("time".to_string(), Value::Timestamp(unix_nanos(self.time)));
        row.insert("data".to_string(), Value::Bytes(self.data.clone()));

        row
    }
}

fn attr_keys_and_values(attrs: &AttrMap) -> (Vec<String>, Vec<String>) {
    let mut keys = Vec::with_capacity(attrs.len());
    let mut values = Vec::with_capacity(attrs.len());
    for (key, value) in attrs.iter() {
        keys.push(key.clone());
        values.push(truncate(&value.to_string(), MAX_ATTR_VALUE_LEN).to_string());
    }
    (keys, values)
}

fn format_trace_id(trace_id: u128) -> String {
    format!("{trace_id:032x}")
}

fn unix_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrValue;

    fn make_span() -> Span {
        let mut attrs = AttrMap::new();
        attrs.insert("service.name", AttrValue::Str("web".into()));
        attrs.insert("host.name", AttrValue::Str("host-1".into()));
        attrs.insert("long", AttrValue::Str("x".repeat(500)));

        Span {
            project_id: 7,
            id: 42,
            parent_id: 0,
            trace_id: 0xabc,
            name: "GET /home".to_string(),
            kind: SpanKind::Server,
            system: "service:web".to_string(),
            group_id: 99,
            time: DateTime::from_timestamp_nanos(1_544_712_660_000_000_000),
            duration: 1_000_000_000,
            status_code: SpanStatusCode::Ok,
            status_message: String::new(),
            attrs,
            events: vec![],
            links: vec![],
        }
    }

    #[test]
    fn test_index_projection() {
        let index = SpanIndex::from_span(make_span());

        assert_eq!(index.count, 1);
        assert_eq!(index.service_name, "web");
        assert_eq!(index.host_name, "host-1");
        assert_eq!(index.attr_keys.len(), index.attr_values.len());
        assert!(index.attr_values.iter().all(|v| v.len() <= MAX_ATTR_VALUE_LEN));
    }

    #[test]
    fn test_index_row_shares_identity_with_data_row() {
        let span = make_span();
        let data = SpanData::from_span(&span);
        let index = SpanIndex::from_span(span);

        let index_row = index.to_row();
        let data_row = data.to_row();

        for column in ["trace_id", "id", "parent_id", "time"] {
            assert_eq!(index_row.get(column), data_row.get(column), "column {column}");
        }
        assert_eq!(
            index_row.get("project_id"),
            Some(&Value::UInt64(7)),
            "project_id only lives in the index row"
        );
    }

    #[test]
    fn test_data_blob_is_self_describing() {
        let span = make_span();
        let data = SpanData::from_span(&span);

        let decoded: Span = serde_json::from_slice(&data.data).unwrap();
        assert_eq!(decoded.name, "GET /home");
        assert_eq!(decoded.trace_id, 0xabc);
        assert_eq!(decoded.kind, SpanKind::Server);
    }

    #[test]
    fn test_event_count_clamps_at_255() {
        let mut span = make_span();
        span.events = (0..300)
            .map(|i| SpanEvent {
                name: format!("e{i}"),
                time: span.time,
                attrs: AttrMap::new(),
            })
            .collect();

        let index = SpanIndex::from_span(span);
        assert_eq!(index.event_count, 255);
    }

    #[test]
    fn test_kind_and_status_names() {
        assert_eq!(SpanKind::from_otlp(2).as_str(), "server");
        assert_eq!(SpanKind::from_otlp(0).as_str(), "unspecified");
        assert_eq!(SpanKind::from_otlp(42).as_str(), "unspecified");
        assert_eq!(SpanStatusCode::from_otlp(1).as_str(), "ok");
        assert_eq!(SpanStatusCode::from_otlp(2).as_str(), "error");
        assert_eq!(SpanStatusCode::from_otlp(0).as_str(), "unset");
    }
}

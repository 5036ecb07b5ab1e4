//! Builds internal spans from OTLP wire spans and scope-merged resources.

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::trace::v1 as otlp;

use super::fingerprint;
use super::{Span, SpanEvent, SpanKind, SpanLink, SpanStatusCode};
use crate::attrs::{self, AttrMap};

const LOG_EVENT: &str = "log";
const EXCEPTION_EVENT: &str = "exception";
const MESSAGE_EVENT: &str = "message";

/// Translates one wire span into a normalized, classified `Span`.
///
/// Resource attributes are copied first, so span attributes win on
/// collision. The span never fails to build; malformed wire bytes
/// normalize to zero.
pub fn build_span(project_id: u32, src: &otlp::Span, resource: &AttrMap) -> Span {
    let mut merged = resource.clone();
    merged.extend_from_key_values(&src.attributes);

    let (status_code, status_message) = match &src.status {
        Some(status) => (
            SpanStatusCode::from_otlp(status.code),
            status.message.clone(),
        ),
        None => (SpanStatusCode::Unset, String::new()),
    };

    let mut span = Span {
        project_id,
        id: decode_span_id(&src.span_id),
        parent_id: decode_span_id(&src.parent_span_id),
        trace_id: decode_trace_id(&src.trace_id),
        name: src.name.clone(),
        kind: SpanKind::from_otlp(src.kind),
        system: String::new(),
        group_id: 0,
        time: from_unix_nanos(src.start_time_unix_nano),
        duration: src.end_time_unix_nano.saturating_sub(src.start_time_unix_nano),
        status_code,
        status_message,
        attrs: merged,
        events: src
            .events
            .iter()
            .map(|event| build_event(&src.name, event))
            .collect(),
        links: src.links.iter().map(build_link).collect(),
    };

    fingerprint::assign_system_and_group(&mut span);
    span
}

fn decode_span_id(bytes: &[u8]) -> u64 {
    match <[u8; 8]>::try_from(bytes) {
        Ok(bytes) => u64::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

fn decode_trace_id(bytes: &[u8]) -> u128 {
    match <[u8; 16]>::try_from(bytes) {
        Ok(bytes) => u128::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

fn from_unix_nanos(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos as i64)
}

fn build_event(span_name: &str, src: &otlp::span::Event) -> SpanEvent {
    let mut event = SpanEvent {
        name: src.name.clone(),
        time: from_unix_nanos(src.time_unix_nano),
        attrs: AttrMap::from_key_values(&src.attributes),
    };
    if let Some(name) = event_name(span_name, &event) {
        event.name = name;
    }
    event
}

/// Derives a readable event name; `None` keeps the wire name.
fn event_name(span_name: &str, event: &SpanEvent) -> Option<String> {
    match event.name.as_str() {
        LOG_EVENT => {
            let message = event.attrs.text(attrs::LOG_MESSAGE);
            if !message.is_empty() {
                let severity = event.attrs.text(attrs::LOG_SEVERITY);
                if !severity.is_empty() {
                    return Some(format!("{severity} {message}"));
                }
                return Some(message.to_string());
            }

            let typ = event.attrs.text(attrs::EXCEPTION_TYPE);
            let message = event.attrs.text(attrs::EXCEPTION_MESSAGE);
            if !typ.is_empty() || !message.is_empty() {
                return Some(join_type_message(typ, message));
            }
            None
        }
        EXCEPTION_EVENT => {
            let name = join_type_message(
                event.attrs.text(attrs::EXCEPTION_TYPE),
                event.attrs.text(attrs::EXCEPTION_MESSAGE),
            );
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        }
        MESSAGE_EVENT => {
            let operation = event.attrs.text(attrs::MESSAGING_OPERATION);
            if !operation.is_empty() {
                return Some(format!("{span_name} {operation}"));
            }
            let typ = event.attrs.text(attrs::MESSAGE_TYPE);
            if !typ.is_empty() {
                return Some(format!("{span_name} {typ}"));
            }
            None
        }
        _ => None,
    }
}

fn join_type_message(typ: &str, message: &str) -> String {
    if message.is_empty() {
        return typ.to_string();
    }
    if message.starts_with(typ) {
        return message.to_string();
    }
    format!("{typ}: {message}")
}

fn build_link(src: &otlp::span::Link) -> SpanLink {
    SpanLink {
        trace_id: decode_trace_id(&src.trace_id),
        span_id: decode_span_id(&src.span_id),
        attrs: AttrMap::from_key_values(&src.attributes),
    }
}

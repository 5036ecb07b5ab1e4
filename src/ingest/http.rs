//! OTLP/HTTP JSON ingest and the operational HTTP surface.
//!
//! Endpoint: `POST /v1/traces`, authenticated by the same `uptrace-dsn`
//! header as the gRPC surface and feeding the same staging pipeline.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::pipeline::{MetricsSnapshot, PipelineMetrics};
use super::service::{AuthError, TraceIngest, DSN_HEADER};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: TraceIngest,
    pub metrics: Arc<PipelineMetrics>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/v1/traces", post(export_traces))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn export_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<otlp_json::ExportTraceServiceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dsn = headers
        .get(DSN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let project = state.ingest.authenticate(dsn)?;

    let resource_spans = payload
        .resource_spans
        .into_iter()
        .map(otlp_json::convert_resource_spans)
        .collect();
    state
        .ingest
        .process(&project, resource_spans)
        .await
        .map_err(|status| ApiError::Unavailable(status.message().to_string()))?;

    Ok(Json(serde_json::json!({ "partialSuccess": null })))
}

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingDsn | AuthError::Dsn(_) => ApiError::BadRequest(err.to_string()),
            AuthError::ProjectNotFound(_) => ApiError::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

/// OTLP/JSON wire structs: IDs hex-encoded, 64-bit integers as strings.
pub mod otlp_json {
    use opentelemetry_proto::tonic::common::v1 as common_pb;
    use opentelemetry_proto::tonic::resource::v1 as resource_pb;
    use opentelemetry_proto::tonic::trace::v1 as trace_pb;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ExportTraceServiceRequest {
        #[serde(default)]
        pub resource_spans: Vec<ResourceSpans>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResourceSpans {
        pub resource: Option<Resource>,
        #[serde(default)]
        pub scope_spans: Vec<ScopeSpans>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Resource {
        #[serde(default)]
        pub attributes: Vec<KeyValue>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ScopeSpans {
        pub scope: Option<InstrumentationScope>,
        #[serde(default)]
        pub spans: Vec<Span>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InstrumentationScope {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub version: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Span {
        #[serde(default)]
        pub trace_id: String,
        #[serde(default)]
        pub span_id: String,
        #[serde(default)]
        pub parent_span_id: String,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub kind: i32,
        #[serde(default)]
        pub start_time_unix_nano: String,
        #[serde(default)]
        pub end_time_unix_nano: String,
        #[serde(default)]
        pub attributes: Vec<KeyValue>,
        #[serde(default)]
        pub events: Vec<Event>,
        #[serde(default)]
        pub links: Vec<Link>,
        pub status: Option<Status>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct KeyValue {
        pub key: String,
        pub value: AnyValue,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AnyValue {
        pub string_value: Option<String>,
        pub bool_value: Option<bool>,
        // OTLP/JSON carries int64 as a decimal string.
        pub int_value: Option<String>,
        pub double_value: Option<f64>,
        pub array_value: Option<ArrayValue>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ArrayValue {
        #[serde(default)]
        pub values: Vec<AnyValue>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Event {
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub time_unix_nano: String,
        #[serde(default)]
        pub attributes: Vec<KeyValue>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Link {
        #[serde(default)]
        pub trace_id: String,
        #[serde(default)]
        pub span_id: String,
        #[serde(default)]
        pub attributes: Vec<KeyValue>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        pub code: Option<i32>,
        pub message: Option<String>,
    }

    pub fn convert_resource_spans(src: ResourceSpans) -> trace_pb::ResourceSpans {
        trace_pb::ResourceSpans {
            resource: src.resource.map(|r| resource_pb::Resource {
                attributes: convert_key_values(r.attributes),
                ..Default::default()
            }),
            scope_spans: src.scope_spans.into_iter().map(convert_scope_spans).collect(),
            ..Default::default()
        }
    }

    fn convert_scope_spans(src: ScopeSpans) -> trace_pb::ScopeSpans {
        trace_pb::ScopeSpans {
            scope: src.scope.map(|s| common_pb::InstrumentationScope {
                name: s.name,
                version: s.version,
                ..Default::default()
            }),
            spans: src.spans.into_iter().map(convert_span).collect(),
            ..Default::default()
        }
    }

    fn convert_span(src: Span) -> trace_pb::Span {
        trace_pb::Span {
            trace_id: decode_id(&src.trace_id),
            span_id: decode_id(&src.span_id),
            parent_span_id: decode_id(&src.parent_span_id),
            name: src.name,
            kind: src.kind,
            start_time_unix_nano: parse_nanos(&src.start_time_unix_nano),
            end_time_unix_nano: parse_nanos(&src.end_time_unix_nano),
            attributes: convert_key_values(src.attributes),
            events: src
                .events
                .into_iter()
                .map(|event| trace_pb::span::Event {
                    name: event.name,
                    time_unix_nano: parse_nanos(&event.time_unix_nano),
                    attributes: convert_key_values(event.attributes),
                    ..Default::default()
                })
                .collect(),
            links: src
                .links
                .into_iter()
                .map(|link| trace_pb::span::Link {
                    trace_id: decode_id(&link.trace_id),
                    span_id: decode_id(&link.span_id),
                    attributes: convert_key_values(link.attributes),
                    ..Default::default()
                })
                .collect(),
            status: src.status.map(|status| trace_pb::Status {
                code: status.code.unwrap_or(0),
                message: status.message.unwrap_or_default(),
            }),
            ..Default::default()
        }
    }

    fn convert_key_values(kvs: Vec<KeyValue>) -> Vec<common_pb::KeyValue> {
        kvs.into_iter()
            .map(|kv| common_pb::KeyValue {
                key: kv.key,
                value: Some(convert_any_value(kv.value)),
            })
            .collect()
    }

    fn convert_any_value(src: AnyValue) -> common_pb::AnyValue {
        use common_pb::any_value::Value;

        let value = if let Some(s) = src.string_value {
            Some(Value::StringValue(s))
        } else if let Some(b) = src.bool_value {
            Some(Value::BoolValue(b))
        } else if let Some(i) = src.int_value {
            i.parse().ok().map(Value::IntValue)
        } else if let Some(d) = src.double_value {
            Some(Value::DoubleValue(d))
        } else {
            src.array_value.map(|array| {
                Value::ArrayValue(common_pb::ArrayValue {
                    values: array.values.into_iter().map(convert_any_value).collect(),
                })
            })
        };

        common_pb::AnyValue { value }
    }

    fn decode_id(hex_id: &str) -> Vec<u8> {
        hex::decode(hex_id).unwrap_or_default()
    }

    fn parse_nanos(raw: &str) -> u64 {
        raw.parse().unwrap_or(0)
    }
}

//! Tracedive: trace ingestion core for an OpenTelemetry-compatible
//! observability backend.
//!
//! Agents push OTLP span batches over gRPC or HTTP; each batch is
//! authenticated against a project directory via the `uptrace-dsn` header,
//! and every span is normalized, classified, and fingerprinted before two
//! row projections — a narrow index row and a wide payload row — are bulk
//! inserted into a columnar store.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracedive::ingest::pipeline::{PipelineConfig, SpanPipeline};
//! use tracedive::ingest::service::TraceIngest;
//! use tracedive::project::{Project, ProjectStore};
//! use tracedive::storage::{BulkInserter, MemTableStore};
//!
//! # async fn run() {
//! let store = Arc::new(MemTableStore::new());
//! let pipeline = SpanPipeline::new(
//!     PipelineConfig::default(),
//!     Arc::clone(&store) as Arc<dyn BulkInserter>,
//! );
//! let projects = Arc::new(ProjectStore::new(vec![Project {
//!     id: 1,
//!     name: "web".to_string(),
//!     token: "secret".to_string(),
//! }]));
//! let ingest = TraceIngest::new(projects, pipeline.sender());
//! // Serve `ingest` over tonic and/or axum, then drain on shutdown:
//! pipeline.shutdown().await;
//! # }
//! ```

pub mod attrs;
pub mod ingest;
pub mod project;
pub mod span;
pub mod storage;

// Re-export commonly used types
pub use attrs::{AttrMap, AttrValue};
pub use ingest::pipeline::{PipelineConfig, SpanPipeline};
pub use ingest::service::TraceIngest;
pub use project::{Project, ProjectStore};
pub use span::{Span, SpanData, SpanIndex};
pub use storage::{BulkInserter, MemTableStore};

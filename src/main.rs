//! Tracedive Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - TRACEDIVE_GRPC_ADDR: OTLP/gRPC bind address (default: 0.0.0.0:4317)
//! - TRACEDIVE_HTTP_ADDR: OTLP/HTTP bind address (default: 0.0.0.0:4318)
//! - TRACEDIVE_PROJECTS: Comma-separated `id:name:token` project list
//!   (default: "1:default:local")
//! - RUST_LOG: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracedive::ingest::http::{build_router, AppState};
use tracedive::ingest::pipeline::{PipelineConfig, SpanPipeline};
use tracedive::ingest::service::TraceIngest;
use tracedive::project::{Project, ProjectStore};
use tracedive::storage::{BulkInserter, MemTableStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracedive=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let grpc_addr: SocketAddr = env_or("TRACEDIVE_GRPC_ADDR", "0.0.0.0:4317").parse()?;
    let http_addr: SocketAddr = env_or("TRACEDIVE_HTTP_ADDR", "0.0.0.0:4318").parse()?;

    let projects = parse_projects(&env_or("TRACEDIVE_PROJECTS", "1:default:local"));
    if projects.is_empty() {
        return Err("TRACEDIVE_PROJECTS must contain at least one id:name:token entry".into());
    }
    for project in &projects {
        tracing::info!(id = project.id, name = %project.name, "serving project");
    }

    let config = PipelineConfig::default();
    tracing::info!(
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval.as_millis() as u64,
        max_concurrent_flushes = config.max_concurrent_flushes,
        "pipeline configuration"
    );

    let store = Arc::new(MemTableStore::new());
    let pipeline = SpanPipeline::new(config, Arc::clone(&store) as Arc<dyn BulkInserter>);
    let projects = Arc::new(ProjectStore::new(projects));
    let ingest = TraceIngest::new(projects, pipeline.sender());

    let router = build_router(AppState {
        ingest: ingest.clone(),
        metrics: pipeline.metrics(),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        tracing::info!("shutdown signal received, stopping transports...");
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(%grpc_addr, "starting OTLP/gRPC server");
    let grpc_server = tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        tonic::transport::Server::builder()
            .add_service(TraceServiceServer::new(ingest))
            .serve_with_shutdown(grpc_addr, async move {
                let _ = shutdown.changed().await;
            })
    });

    tracing::info!(%http_addr, "starting OTLP/HTTP server");
    let listener = TcpListener::bind(http_addr).await?;
    let http_server = tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await
        }
    });

    grpc_server.await??;
    http_server.await??;

    // Transports are down; drain staged spans before exiting.
    pipeline.shutdown().await;

    for table in store.table_names() {
        tracing::info!(table = %table, rows = store.row_count(&table), "final table size");
    }
    tracing::info!("tracedive stopped");
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses a comma-separated `id:name:token` project list.
fn parse_projects(raw: &str) -> Vec<Project> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let id = parts.next()?.parse().ok()?;
            let name = parts.next()?.to_string();
            let token = parts.next()?.to_string();
            if token.is_empty() {
                return None;
            }
            Some(Project { id, name, token })
        })
        .collect()
}

//! gRPC ingress: authenticates OTLP export calls and stages their spans.

use std::sync::Arc;

use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::TraceService, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use thiserror::Error;
use tonic::{Request, Response, Status};

use super::pipeline::{IngestItem, SpanSender};
use crate::attrs::{self, AttrMap, AttrValue};
use crate::project::{Dsn, DsnError, Project, ProjectStore};

/// Metadata key carrying the project DSN.
pub const DSN_HEADER: &str = "uptrace-dsn";

/// Authentication failures surfaced to exporters.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("uptrace-dsn header is required")]
    MissingDsn,

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error("project with token {0:?} not found")]
    ProjectNotFound(String),
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Status {
        match &err {
            AuthError::MissingDsn | AuthError::Dsn(_) => Status::invalid_argument(err.to_string()),
            AuthError::ProjectNotFound(_) => Status::not_found(err.to_string()),
        }
    }
}

/// Shared ingress state behind both the gRPC and HTTP surfaces.
#[derive(Clone)]
pub struct TraceIngest {
    projects: Arc<ProjectStore>,
    sender: SpanSender,
}

impl TraceIngest {
    pub fn new(projects: Arc<ProjectStore>, sender: SpanSender) -> Self {
        Self { projects, sender }
    }

    /// Resolves the project a DSN authenticates.
    pub fn authenticate(&self, dsn: &str) -> Result<Project, AuthError> {
        if dsn.is_empty() {
            return Err(AuthError::MissingDsn);
        }
        let dsn = Dsn::parse(dsn)?;
        self.projects
            .find_by_token(&dsn.token)
            .cloned()
            .ok_or(AuthError::ProjectNotFound(dsn.token))
    }

    /// Splits resource-scoped spans into per-span items and stages them in
    /// encounter order. Returns the number of spans staged.
    pub async fn process(
        &self,
        project: &Project,
        resource_spans: Vec<ResourceSpans>,
    ) -> Result<usize, Status> {
        let mut staged = 0;

        for rss in resource_spans {
            let resource = rss
                .resource
                .as_ref()
                .map(|r| AttrMap::from_key_values(&r.attributes))
                .unwrap_or_default();

            for scope_spans in rss.scope_spans {
                // Each scope overlays library attributes onto its own copy of
                // the resource map, so scopes sharing a resource stay isolated.
                let mut scoped = resource.clone();
                let scope = scope_spans.scope.unwrap_or_default();
                scoped.insert(attrs::OTEL_LIBRARY_NAME, AttrValue::Str(scope.name));
                if !scope.version.is_empty() {
                    scoped.insert(attrs::OTEL_LIBRARY_VERSION, AttrValue::Str(scope.version));
                }
                let scoped = Arc::new(scoped);

                for span in scope_spans.spans {
                    self.sender
                        .send(IngestItem {
                            project_id: project.id,
                            span,
                            resource: Arc::clone(&scoped),
                        })
                        .await
                        .map_err(|_| Status::cancelled("span pipeline is shut down"))?;
                    staged += 1;
                }
            }
        }

        Ok(staged)
    }
}

#[tonic::async_trait]
impl TraceService for TraceIngest {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        // Calls cancelled by the client never reach this point; the check
        // here rejects calls racing with process shutdown.
        if self.sender.is_closed() {
            return Err(Status::cancelled("span pipeline is shut down"));
        }

        let dsn = request
            .metadata()
            .get(DSN_HEADER)
            .ok_or(AuthError::MissingDsn)?
            .to_str()
            .map_err(|_| Status::invalid_argument("uptrace-dsn header is not valid ASCII"))?
            .to_string();
        let project = self.authenticate(&dsn)?;

        self.process(&project, request.into_inner().resource_spans)
            .await?;

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

//! HTTP/JSON RPC surface of the build agent: four operations, wire
//! enums in snake_case, build outcomes always encoded as a status value
//! and never as an RPC fault.

use crate::agent::BuildAgent;
use crate::config::AgentConfig;
use crate::queue::IntegrationRequest;
use crate::types::{BuildCondition, BuildId, BuildStatus};
use crate::utils::shutdown_signal;
use anyhow::Context as _;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBuildRequest {
    /// The serialized project definition; the agent resolves it through
    /// a content-hash cache.
    pub project_definition: String,
    pub project_name: String,
    pub build_condition: BuildCondition,
    #[serde(default)]
    pub build_values: BTreeMap<String, String>,
    pub source: String,
    pub user_name: String,
}

impl StartBuildRequest {
    pub(crate) fn integration_request(&self) -> IntegrationRequest {
        IntegrationRequest::new(self.build_condition, &self.source, &self.user_name)
            .with_build_values(self.build_values.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBuildResponse {
    pub build_id: BuildId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CapacityQuery {
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityResponse {
    pub can_build: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatusResponse {
    pub status: BuildStatus,
}

async fn capacity_handler(
    Extension(agent): Extension<Arc<BuildAgent>>,
    Query(query): Query<CapacityQuery>,
) -> Json<CapacityResponse> {
    Json(CapacityResponse {
        can_build: agent.can_build(&query.project),
    })
}

async fn start_build_handler(
    Extension(agent): Extension<Arc<BuildAgent>>,
    Json(request): Json<StartBuildRequest>,
) -> Response {
    let integration_request = request.integration_request();
    match agent.start_build(&request.project_definition, integration_request) {
        Ok(build_id) => Json(StartBuildResponse { build_id }).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            format!(
                "invalid project definition for `{}`: {err:#}",
                request.project_name
            ),
        )
            .into_response(),
    }
}

async fn cancel_build_handler(
    Extension(agent): Extension<Arc<BuildAgent>>,
    Path(id): Path<BuildId>,
) -> Json<serde_json::Value> {
    agent.cancel_build(id);
    Json(serde_json::json!({}))
}

async fn build_status_handler(
    Extension(agent): Extension<Arc<BuildAgent>>,
    Path(id): Path<BuildId>,
) -> Json<BuildStatusResponse> {
    Json(BuildStatusResponse {
        status: agent.retrieve_build_status(id),
    })
}

pub fn build_agent_routes(agent: Arc<BuildAgent>) -> Router {
    Router::new()
        .route("/api/v1/capacity", get(capacity_handler))
        .route("/api/v1/builds", post(start_build_handler))
        .route("/api/v1/builds/{id}", get(build_status_handler))
        .route("/api/v1/builds/{id}/cancel", post(cancel_build_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(agent)),
        )
}

#[instrument(skip_all)]
pub async fn run_agent_server(config: &AgentConfig, agent: Arc<BuildAgent>) -> anyhow::Result<()> {
    let sweeper = agent.start_status_sweeper();

    info!("starting build agent on `{}`", config.bind);

    let app = build_agent_routes(agent).into_make_service();
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .context("error binding socket for build agent")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();

    Ok(())
}

//! Status and trigger API of the scheduler daemon. Read endpoints serve
//! point-in-time snapshots; trigger endpoints route commands into the
//! queue manager and report queue errors as HTTP statuses.

use crate::context::Context;
use crate::error::QueueError;
use crate::utils::shutdown_signal;
use anyhow::Context as _;
use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::UnknownProject(_) | QueueError::UnknownQueue(_) => StatusCode::NOT_FOUND,
            QueueError::NotRunning(_) => StatusCode::CONFLICT,
            QueueError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceBuildRequest {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default)]
    pub build_values: BTreeMap<String, String>,
}

// a bodyless trigger must fall back to the same requester name as a
// `{}` body, so this cannot be the derived (empty-string) default
impl Default for ForceBuildRequest {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            build_values: BTreeMap::new(),
        }
    }
}

fn default_user_name() -> String {
    "web".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPendingResponse {
    pub removed: usize,
}

async fn status_handler(Extension(ctx): Extension<Context>) -> Result<Response, ApiError> {
    let snapshot = ctx.queue_manager.server_snapshot().await?;
    Ok(Json(snapshot).into_response())
}

async fn queues_handler(Extension(ctx): Extension<Context>) -> Result<Response, ApiError> {
    let snapshot = ctx.queue_manager.queue_snapshot().await?;
    Ok(Json(snapshot).into_response())
}

async fn force_build_handler(
    Extension(ctx): Extension<Context>,
    Path(name): Path<String>,
    body: Option<Json<ForceBuildRequest>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    ctx.queue_manager
        .force_build(&name, &body.user_name, body.build_values)
        .await?;
    Ok(Json(serde_json::json!({})).into_response())
}

async fn cancel_pending_handler(
    Extension(ctx): Extension<Context>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let removed = ctx.queue_manager.cancel_pending_request(&name).await?;
    Ok(Json(CancelPendingResponse { removed }).into_response())
}

async fn start_project_handler(
    Extension(ctx): Extension<Context>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    ctx.queue_manager.start(&name).await?;
    Ok(Json(serde_json::json!({})).into_response())
}

async fn stop_project_handler(
    Extension(ctx): Extension<Context>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    ctx.queue_manager.stop(&name).await?;
    Ok(Json(serde_json::json!({})).into_response())
}

pub fn web_routes(context: Context) -> Router {
    Router::new()
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/queues", get(queues_handler))
        .route("/api/v1/projects/{name}/force-build", post(force_build_handler))
        .route(
            "/api/v1/projects/{name}/cancel-pending",
            post(cancel_pending_handler),
        )
        .route("/api/v1/projects/{name}/start", post(start_project_handler))
        .route("/api/v1/projects/{name}/stop", post(stop_project_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(context)),
        )
}

#[instrument(skip_all)]
pub async fn run_web_server(context: Context) -> anyhow::Result<()> {
    let bind = context.config.web_bind;
    info!("starting web server on `{bind}`");

    let app = web_routes(context).into_make_service();
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context("error binding socket for web server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Definitions};
    use crate::manager::project::Project;
    use http_body_util::BodyExt as _;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt as _;

    fn test_context(projects: Vec<Project>) -> Context {
        let config = Arc::new(Config {
            definitions_path: "conveyor.toml".into(),
            queue_lock_timeout: Duration::from_secs(5),
            integrator_poll_interval: Duration::from_millis(50),
            remote_poll_interval: Duration::from_millis(20),
            rpc_call_retries: 0,
            web_bind: "127.0.0.1:0".parse().unwrap(),
        });
        Context::new(
            config,
            Definitions {
                projects,
                queues: vec![],
            },
        )
        .unwrap()
    }

    fn project(name: &str) -> Project {
        Project {
            name: name.into(),
            queue: None,
            queue_priority: 0,
            command: "true".into(),
            args: vec![],
            working_dir: None,
            agent: None,
        }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => request.body(axum::body::Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()));
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_projects_and_queues() {
        let ctx = test_context(vec![project("app")]);
        let app = web_routes(ctx);

        let (status, body) = call(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "projects": [
                    { "name": "app", "queue": "app", "state": "stopped" }
                ],
                "queues": { "queues": [] },
            })
        );
    }

    #[tokio::test]
    async fn force_build_enqueues_and_shows_up_in_the_queues_view() {
        let ctx = test_context(vec![project("app")]);
        let app = web_routes(ctx);

        // without a body the request falls back to defaults
        let (status, _body) = call(&app, "POST", "/api/v1/projects/app/force-build", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", "/api/v1/queues", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "queues": [{
                    "name": "app",
                    "items": [{
                        "project_name": "app",
                        "priority": 0,
                        "condition": "force_build",
                        "source": "web",
                    }],
                }],
            })
        );
    }

    #[tokio::test]
    async fn cancel_pending_reports_the_removed_count() {
        let ctx = test_context(vec![project("app")]);
        let app = web_routes(ctx);

        // two force builds: the head occupies the active slot, the
        // pending slot is deduplicated, so nothing is pending yet
        call(&app, "POST", "/api/v1/projects/app/force-build", None).await;
        let (status, body) =
            call(&app, "POST", "/api/v1/projects/app/cancel-pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "removed": 0 }));
    }

    #[tokio::test]
    async fn unknown_projects_are_not_found() {
        let ctx = test_context(vec![]);
        let app = web_routes(ctx);

        for uri in [
            "/api/v1/projects/ghost/force-build",
            "/api/v1/projects/ghost/cancel-pending",
            "/api/v1/projects/ghost/start",
            "/api/v1/projects/ghost/stop",
        ] {
            let (status, _body) = call(&app, "POST", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "uri: {uri}");
        }
    }

    #[tokio::test]
    async fn start_and_stop_toggle_the_integrator_state() {
        let ctx = test_context(vec![project("app")]);
        let manager = ctx.queue_manager.clone();
        let app = web_routes(ctx);

        let (status, _body) = call(&app, "POST", "/api/v1/projects/app/start", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(body["projects"][0]["state"], "running");

        let (status, _body) = call(&app, "POST", "/api/v1/projects/app/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        manager.wait_for_exit("app").await.unwrap();

        let (_, body) = call(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(body["projects"][0]["state"], "stopped");

        // stopping again is a conflict
        let (status, _body) = call(&app, "POST", "/api/v1/projects/app/stop", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn force_build_accepts_an_explicit_requester_and_values() {
        let ctx = test_context(vec![project("app")]);
        let app = web_routes(ctx);

        let (status, _body) = call(
            &app,
            "POST",
            "/api/v1/projects/app/force-build",
            Some(serde_json::json!({
                "user_name": "alice",
                "build_values": { "target": "release" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}

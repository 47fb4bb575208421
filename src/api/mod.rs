//! HTTP API
//!
//! Thin axum surface over the services: deserialize, validate, delegate,
//! serialize. Error bodies carry a human-readable message; structured detail
//! stays in the logs.

mod conversations;
mod generate;
mod prompts;
mod tasks;
mod templates;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::services::prompts::UserPromptStore;
use crate::services::tasks::JobManager;
use crate::services::templates::TemplateRegistry;
use crate::services::workflow::WorkflowEngine;
use crate::storage::ConversationStore;
use crate::utils::error::AppError;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: JobManager,
    pub engine: Arc<WorkflowEngine>,
    pub store: ConversationStore,
    pub user_prompts: Arc<UserPromptStore>,
    pub templates: Arc<TemplateRegistry>,
}

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/generate", post(generate::generate))
        .route("/api/generate/async", post(generate::generate_async))
        .route("/api/tasks/statistics", get(tasks::statistics))
        .route("/api/tasks/:id", get(tasks::get_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/api/templates/", get(templates::list_templates))
        .route(
            "/api/user/prompts",
            get(prompts::get_user_prompts).post(prompts::set_user_prompts),
        )
        .route("/api/conversations/tasks", get(conversations::list_tasks))
        .route(
            "/api/conversations/tasks/:id",
            get(conversations::task_detail),
        )
        .route(
            "/api/conversations/tasks/:id/rounds",
            get(conversations::task_rounds),
        )
        .route(
            "/api/conversations/tasks/:id/rounds/:round",
            get(conversations::round_detail),
        )
        .route(
            "/api/conversations/health",
            get(conversations::health_check),
        )
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Map an [`AppError`] onto an HTTP response with an `{ok:false, ...}` body.
pub(crate) fn error_response(err: AppError) -> Response {
    let status = match &err {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match &err {
        // Internal details stay in the logs; clients get a terse line.
        AppError::Internal(_) | AppError::Database(_) | AppError::Sqlite(_) | AppError::Io(_) => {
            tracing::error!(error = %err, "请求处理失败");
            "服务器内部错误，请稍后重试".to_string()
        }
        other => other.to_string(),
    };
    let body = Json(serde_json::json!({
        "ok": false,
        "error": err.kind(),
        "message": message,
    }));
    (status, body).into_response()
}

/// Result alias used by handlers; errors render through [`error_response`].
pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// Newtype so `?` works on AppError inside handlers.
pub(crate) struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.0)
    }
}

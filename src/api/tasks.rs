//! Task Endpoints
//!
//! Polling, cancellation and statistics for asynchronous jobs.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use super::{ApiResult, AppState};
use crate::models::job::JobSnapshot;
use crate::services::tasks::CancelOutcome;
use crate::utils::error::AppError;

fn parse_task_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found("任务不存在"))
}

/// GET /api/tasks/{id} — consistent snapshot of one job.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.manager.get(id)?))
}

/// POST /api/tasks/{id}/cancel — set the cancellation signal. Idempotent.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_task_id(&id)?;
    let outcome = state.manager.cancel(id)?;
    let (late, message) = match outcome {
        CancelOutcome::Signalled => (false, "任务已取消"),
        CancelOutcome::Late => (true, "任务已结束，无需取消"),
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "late": late,
        "message": message,
    })))
}

/// GET /api/tasks/statistics — counts by status, queue depth, busy workers.
pub async fn statistics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.manager.statistics();
    Json(serde_json::json!({
        "ok": true,
        "statistics": stats,
    }))
}

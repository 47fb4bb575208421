//! Conversation Endpoints
//!
//! Browse the persisted per-round dialogue of past and running generations.

use axum::extract::{Path, State};
use axum::Json;

use super::{ApiResult, AppState};
use crate::utils::error::AppError;

/// GET /api/conversations/tasks — all registered runs, most recent first.
pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let tasks = state.store.list_tasks().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": tasks,
    })))
}

/// GET /api/conversations/tasks/{id}
pub async fn task_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state
        .store
        .task(id)
        .await?
        .ok_or_else(|| AppError::not_found("任务不存在"))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": task,
    })))
}

/// GET /api/conversations/tasks/{id}/rounds — distinct ascending indices.
pub async fn task_rounds(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.task(id.clone()).await?.is_none() {
        return Err(AppError::not_found("任务不存在").into());
    }
    let rounds = state.store.rounds_for(id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": rounds,
    })))
}

/// GET /api/conversations/tasks/{id}/rounds/{round}
pub async fn round_detail(
    State(state): State<AppState>,
    Path((id, round)): Path<(String, u32)>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.store.round_view(id, round).await?;
    if view.is_empty() {
        return Err(AppError::not_found("该轮次不存在").into());
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "data": view,
    })))
}

/// GET /api/conversations/health — store liveness probe.
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let healthy = state.store.is_healthy();
    Json(serde_json::json!({
        "success": healthy,
        "status": if healthy { "ok" } else { "unavailable" },
    }))
}

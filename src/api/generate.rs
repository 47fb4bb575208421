//! Generation Endpoints
//!
//! Synchronous and asynchronous entry points for patent generation runs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::{ApiResult, AppState};
use crate::services::tasks::ProgressFn;
use crate::services::validator::{validate_request, GenerateRequest};
use crate::utils::text::truncate_chars;

/// Preview length for the last review in the synchronous response
const REVIEW_PREVIEW_CHARS: usize = 2000;

/// POST /api/generate — run the whole pipeline before responding.
pub async fn generate(
    State(state): State<AppState>,
    Json(raw): Json<GenerateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let input = validate_request(&raw, &state.config.security)?;
    let job_id = Uuid::new_v4();
    info!(task_id = %job_id, mode = %input.mode, iterations = input.iterations, "同步生成请求");

    let progress: ProgressFn = Arc::new(|_, _| {});
    let result = state
        .engine
        .execute(job_id, input, progress, CancellationToken::new())
        .await?;

    let preview = result
        .last_review
        .as_deref()
        .map(|review| truncate_chars(review, REVIEW_PREVIEW_CHARS));

    Ok(Json(serde_json::json!({
        "ok": true,
        "outputPath": result.output_path,
        "iterations": result.iterations,
        "lastReviewPreview": preview,
    })))
}

/// POST /api/generate/async — enqueue and return a task id for polling.
pub async fn generate_async(
    State(state): State<AppState>,
    Json(raw): Json<GenerateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let input = validate_request(&raw, &state.config.security)?;
    let task_id = state.manager.submit(input)?;
    info!(task_id = %task_id, "异步任务已提交");

    Ok(Json(serde_json::json!({
        "ok": true,
        "taskId": task_id.to_string(),
        "message": "任务已提交，请使用任务ID查询进度",
    })))
}

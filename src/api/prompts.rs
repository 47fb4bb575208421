//! User Prompt Endpoints
//!
//! Read and update the user-custom writer/reviewer prompts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SetPromptsRequest {
    pub writer: Option<String>,
    pub reviewer: Option<String>,
}

/// GET /api/user/prompts
pub async fn get_user_prompts(State(state): State<AppState>) -> Json<serde_json::Value> {
    let record = state.user_prompts.load();
    let stats = state.user_prompts.stats();
    Json(serde_json::json!({
        "success": true,
        "data": {
            "prompts": record.prompts,
            "stats": stats,
        }
    }))
}

/// POST /api/user/prompts — update one or both role prompts atomically.
pub async fn set_user_prompts(
    State(state): State<AppState>,
    Json(body): Json<SetPromptsRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if body.writer.is_none() && body.reviewer.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "success": false,
                "error": "请求数据不能为空",
            })),
        ));
    }

    state
        .user_prompts
        .set_all(body.writer.as_deref(), body.reviewer.as_deref())
        .map_err(|e| {
            tracing::error!(error = %e, "保存用户提示词失败");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error": "提示词保存失败",
                })),
            )
        })?;

    info!(
        writer = body.writer.is_some(),
        reviewer = body.reviewer.is_some(),
        "用户提示词已更新"
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "data": {
            "updated": {
                "writer": body.writer.is_some(),
                "reviewer": body.reviewer.is_some(),
            },
            "message": "提示词保存成功",
        }
    })))
}

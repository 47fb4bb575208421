//! Template Endpoints
//!
//! Listing of the document templates a run can be labeled with.

use axum::extract::State;
use axum::Json;

use super::AppState;

/// GET /api/templates/
pub async fn list_templates(State(state): State<AppState>) -> Json<serde_json::Value> {
    let templates = state.templates.list();
    let stats = state.templates.stats();
    Json(serde_json::json!({
        "ok": true,
        "templates": templates,
        "default_template_id": state.templates.default_template_id(),
        "stats": stats,
    }))
}

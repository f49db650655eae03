/*
 * Responsibility
 * - GET /health (liveness + authentication configuration summary)
 * - Mounted outside the request-context middleware; needs no token
 */
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let auth = state.orchestrator.auth_status().await;
    (StatusCode::OK, Json(json!({ "status": "ok", "auth": auth })))
}

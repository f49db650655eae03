/*
 * Responsibility
 * - v1 URL structure
 * - Every route here runs behind the request-context middleware (applied by app.rs)
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::v1::handlers::tools::{invoke_tool, list_tools};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(invoke_tool))
}

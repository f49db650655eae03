/*
 * Responsibility
 * - GET /tools: tools the caller may invoke
 * - POST /tools/{name}: authorize and run one tool under the bound request context
 */
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::v1::extractors::RequestCtx;
use crate::error::AppError;
use crate::state::AppState;
use crate::tools::{ToolDescriptor, ToolInvocation};

#[derive(Debug, Default, Deserialize)]
pub struct InvokeBody {
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub scope: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
) -> Json<Vec<ToolDescriptor>> {
    Json(state.dispatcher.list(&ctx))
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Option<Json<InvokeBody>>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    // No body at all is an invocation without params.
    let body = body
        .map_err(|rejection| AppError::bad_request("INVALID_BODY", rejection.body_text()))?
        .map(|Json(b)| b)
        .unwrap_or_default();
    let params = match body.params {
        Value::Null => json!({}),
        other => other,
    };

    let mut invocation = ToolInvocation::new(name, params);
    if let Some(scope) = body.scope {
        invocation = invocation.with_scope(scope);
    }
    let tool = invocation.tool.clone();

    let result = state.dispatcher.dispatch(invocation).await?;
    Ok(Json(json!({ "tool": tool, "result": result })))
}

/*
 * Responsibility
 * - Local transport: one JSON request per line in, one JSON response per line out
 * - Each line is its own request scope; a missing token means the ambient identity
 *
 * Notes
 * - stdout carries protocol frames only. Logs go to stderr (see app::init_tracing).
 */
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::services::auth::TokenError;
use crate::services::orchestrator::RequestEnvelope;
use crate::state::AppState;
use crate::tools::{ToolError, ToolInvocation};

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Op {
    #[default]
    Call,
    List,
}

// No Debug: carries the raw token.
#[derive(Deserialize)]
struct StdioRequest {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    op: Op,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    role_arn: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl StdioRequest {
    fn envelope(&self) -> RequestEnvelope {
        let mut envelope = RequestEnvelope::local();
        if let Some(token) = &self.token {
            envelope = envelope.with_bearer(token.clone());
        }
        if let Some(role) = &self.role_arn {
            envelope = envelope.with_role_id(role.clone());
        }
        if let Some(user) = &self.user_id {
            envelope = envelope.with_user_id(user.clone());
        }
        envelope
    }
}

#[derive(Debug, Serialize)]
struct ErrorFrame {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl ErrorFrame {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_REQUEST",
            message: message.into(),
            reason: None,
        }
    }
}

impl From<TokenError> for ErrorFrame {
    fn from(err: TokenError) -> Self {
        let code = err.code();
        // Malformed-token detail can echo token fragments; keep it in logs only.
        let message = match err {
            TokenError::Malformed(_) => "malformed token".to_string(),
            other => other.to_string(),
        };
        Self {
            code,
            message,
            reason: None,
        }
    }
}

impl From<ToolError> for ErrorFrame {
    fn from(err: ToolError) -> Self {
        Self {
            code: err.kind.as_str(),
            message: err.message,
            reason: err.reason,
        }
    }
}

/// Serves requests until `input` reaches EOF.
pub async fn serve<R, W>(state: AppState, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let frame = handle_line(&state, &line).await;
        let mut bytes = serde_json::to_vec(&frame).map_err(io::Error::other)?;
        bytes.push(b'\n');
        output.write_all(&bytes).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn handle_line(state: &AppState, line: &str) -> Value {
    let request: StdioRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable stdio request");
            return error_frame(Value::Null, ErrorFrame::invalid_request("invalid JSON request"));
        }
    };

    let id = request.id.clone();
    match respond(state, request).await {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(err) => error_frame(id, err),
    }
}

async fn respond(state: &AppState, request: StdioRequest) -> Result<Value, ErrorFrame> {
    let envelope = request.envelope();

    match request.op {
        Op::List => {
            let tools = state
                .orchestrator
                .run(envelope, |ctx| async move { state.dispatcher.list(&ctx) })
                .await?;
            Ok(json!({ "tools": tools }))
        }
        Op::Call => {
            let Some(tool) = request.tool else {
                return Err(ErrorFrame::invalid_request("missing field: tool"));
            };
            let params = match request.params {
                Value::Null => json!({}),
                other => other,
            };
            let mut invocation = ToolInvocation::new(tool, params);
            if let Some(scope) = request.scope {
                invocation = invocation.with_scope(scope);
            }

            let outcome = state
                .orchestrator
                .run(envelope, |_ctx| state.dispatcher.dispatch(invocation))
                .await?;
            Ok(outcome?)
        }
    }
}

fn error_frame(id: Value, err: ErrorFrame) -> Value {
    json!({ "id": id, "error": err })
}

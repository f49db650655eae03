//! Tool dispatch: registry of handlers, authorization before execution.
pub mod builtin;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::services::authz::{AuthorizationGate, AuthzDecision};
use crate::services::context::{self, RequestContext};
use crate::services::credentials::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    UnknownTool,
    PermissionDenied,
    NoCredentialSource,
    InvalidParams,
    Upstream,
    Internal,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NoCredentialSource => "NO_CREDENTIAL_SOURCE",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::Upstream => "UPSTREAM",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Structured tool failure returned to the caller.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    /// Finer-grained code (denial reason, derivation failure code).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// One call to a tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub scope: Option<String>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Explicit scope, else the `bucket` parameter most catalog tools take.
    pub fn effective_scope(&self) -> Option<&str> {
        self.scope
            .as_deref()
            .or_else(|| self.params.get("bucket").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the tool calls the provider with the request's derived credentials.
    fn requires_credentials(&self) -> bool {
        true
    }

    async fn invoke(&self, params: Value, ctx: &RequestContext) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}

/// Registered tools plus the gate every dispatch goes through.
pub struct ToolDispatcher {
    gate: AuthorizationGate,
    handlers: BTreeMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolDispatcher {
    pub fn new(gate: AuthorizationGate) -> Self {
        Self {
            gate,
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        tracing::debug!(tool = handler.name(), "registering tool");
        self.handlers.insert(handler.name(), handler);
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    /// Registered tools the caller is allowed to invoke.
    pub fn list(&self, ctx: &RequestContext) -> Vec<ToolDescriptor> {
        self.handlers
            .values()
            .filter(|h| self.gate.authorize(ctx.claims(), h.name(), None).is_allowed())
            .map(|h| ToolDescriptor {
                name: h.name().to_owned(),
                description: h.description().to_owned(),
                permissions: self.gate.catalog().permissions_for(h.name()).to_vec(),
            })
            .collect()
    }

    /// Dispatches under the request context bound to the current task.
    pub async fn dispatch(&self, invocation: ToolInvocation) -> Result<Value, ToolError> {
        let ctx = context::current().ok_or_else(|| {
            ToolError::new(ToolErrorKind::Internal, "no request context is bound")
        })?;
        self.dispatch_with(&ctx, invocation).await
    }

    pub async fn dispatch_with(
        &self,
        ctx: &RequestContext,
        invocation: ToolInvocation,
    ) -> Result<Value, ToolError> {
        let tool = invocation.tool.as_str();
        let Some(handler) = self.handlers.get(tool) else {
            return Err(ToolError::new(
                ToolErrorKind::UnknownTool,
                format!("unknown tool: {tool}"),
            ));
        };

        let scope = invocation.effective_scope();
        let identity = ctx.claims().identity();

        let role = match self.gate.authorize(ctx.claims(), tool, scope) {
            AuthzDecision::Allowed { role } => role,
            AuthzDecision::Denied(reason) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    identity = %identity,
                    tool = %tool,
                    scope = ?scope,
                    reason = reason.as_str(),
                    "tool call denied"
                );
                return Err(ToolError::new(
                    ToolErrorKind::PermissionDenied,
                    format!("{identity} may not call {tool}"),
                )
                .with_reason(reason.as_str()));
            }
        };

        if handler.requires_credentials()
            && let Err(err) = usable_credentials(ctx)
        {
            tracing::warn!(
                request_id = %ctx.request_id(),
                identity = %identity,
                tool = %tool,
                code = err.code(),
                "tool needs credentials the request does not have"
            );
            return Err(ToolError::new(
                ToolErrorKind::NoCredentialSource,
                format!("{tool} needs provider credentials: {err}"),
            )
            .with_reason(err.code()));
        }

        tracing::info!(
            request_id = %ctx.request_id(),
            identity = %identity,
            tool = %tool,
            scope = ?scope,
            role = %role,
            permissions = ?self.gate.catalog().permissions_for(tool),
            "tool call authorized"
        );

        let params = invocation.params;
        handler.invoke(params, ctx).await
    }
}

/// The request's credentials, unless derivation failed or they lapsed since.
fn usable_credentials(ctx: &RequestContext) -> Result<(), CredentialError> {
    let resolved = ctx.credentials().map_err(Clone::clone)?;
    match resolved.derived() {
        Some(creds) if creds.is_expired(Utc::now()) => Err(CredentialError::Expired {
            expires_at: creds.expires_at(),
        }),
        _ => Ok(()),
    }
}

/*
 * Responsibility
 * - Introspection tools that ship with the gateway itself
 * - None of them touch provider credentials; they report on the request context
 */
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::services::authz::AuthorizationGate;
use crate::services::catalog_client::{CatalogClient, CatalogClientError};
use crate::services::context::RequestContext;
use crate::tools::{ToolDispatcher, ToolError, ToolErrorKind, ToolHandler};

/// Who the caller is and where its credentials came from. Never includes key material.
pub struct AuthStatusTool;

#[async_trait]
impl ToolHandler for AuthStatusTool {
    fn name(&self) -> &'static str {
        "auth_status"
    }

    fn description(&self) -> &'static str {
        "Report the caller's identity, roles and credential source"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn invoke(&self, _params: Value, ctx: &RequestContext) -> Result<Value, ToolError> {
        let claims = ctx.claims();
        let credentials = match ctx.credentials() {
            Ok(resolved) => json!({
                "status": "available",
                "source": resolved.source_label(),
                "audit_identity": resolved.audit_identity(),
                "role_id": resolved.derived().and_then(|c| c.role_id()),
                "expires_at": resolved.expires_at(),
            }),
            Err(err) => json!({
                "status": "unavailable",
                "code": err.code(),
                "message": err.to_string(),
            }),
        };

        Ok(json!({
            "request_id": ctx.request_id(),
            "transport": ctx.transport(),
            "identity": claims.identity(),
            "subject": claims.subject(),
            "email": claims.email(),
            "roles": claims.roles(),
            "is_admin": claims.is_admin(),
            "ambient": claims.is_ambient(),
            "token_fingerprint": claims.fingerprint(),
            "token_expires_at": claims.expires_at(),
            "requested_role": ctx.role_id(),
            "credentials": credentials,
        }))
    }
}

/// The caller's roles and the tools they unlock, with the provider permissions each tool needs.
pub struct PermissionsListTool {
    gate: AuthorizationGate,
}

impl PermissionsListTool {
    pub fn new(gate: AuthorizationGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl ToolHandler for PermissionsListTool {
    fn name(&self) -> &'static str {
        "permissions_list"
    }

    fn description(&self) -> &'static str {
        "List the caller's roles and the tools they may invoke"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn invoke(&self, _params: Value, ctx: &RequestContext) -> Result<Value, ToolError> {
        let claims = ctx.claims();
        let catalog = self.gate.catalog();

        let roles: Vec<Value> = claims
            .roles()
            .iter()
            .map(|name| match catalog.role_definition(name) {
                Ok(role) => json!({ "name": role.name, "level": role.level, "known": true }),
                Err(_) => json!({ "name": name, "known": false }),
            })
            .collect();

        let tools: Vec<Value> = self
            .gate
            .allowed_tools(claims)
            .map(|tool| json!({ "name": tool, "permissions": catalog.permissions_for(tool) }))
            .collect();

        Ok(json!({
            "identity": claims.identity(),
            "is_admin": claims.is_admin(),
            "roles": roles,
            "tools": tools,
        }))
    }
}

/// Fetches the catalog's public `config.json` with the caller's bearer token.
pub struct CatalogConfigTool {
    client: CatalogClient,
}

impl CatalogConfigTool {
    pub fn new(client: CatalogClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for CatalogConfigTool {
    fn name(&self) -> &'static str {
        "catalog_config"
    }

    fn description(&self) -> &'static str {
        "Fetch the catalog configuration"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn invoke(&self, _params: Value, ctx: &RequestContext) -> Result<Value, ToolError> {
        self.client
            .get_json("config.json", ctx)
            .await
            .map_err(|err| {
                let kind = match &err {
                    CatalogClientError::MissingToken => ToolErrorKind::NoCredentialSource,
                    CatalogClientError::Denied(_) => ToolErrorKind::PermissionDenied,
                    CatalogClientError::InvalidPath(_) => ToolErrorKind::InvalidParams,
                    CatalogClientError::NotConfigured | CatalogClientError::Unavailable(_) => {
                        ToolErrorKind::Upstream
                    }
                };
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    "catalog request failed"
                );
                ToolError::new(kind, err.to_string())
            })
    }
}

/// Registers every tool that ships with the gateway.
pub fn register_builtins(dispatcher: &mut ToolDispatcher, client: CatalogClient) {
    let gate = dispatcher.gate().clone();
    dispatcher.register(Arc::new(AuthStatusTool));
    dispatcher.register(Arc::new(PermissionsListTool::new(gate)));
    dispatcher.register(Arc::new(CatalogConfigTool::new(client)));
}

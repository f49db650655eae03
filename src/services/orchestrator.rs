/*
 * Responsibility
 * - Per-call lifecycle: envelope -> token validation -> credential derivation -> bound context
 * - Decides which failures end the call (token) and which are recorded and carried (credentials)
 */
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use uuid::Uuid;

use crate::services::auth::{AuthClaims, TokenError, TokenValidator};
use crate::services::context::{self, RequestContext, TransportKind};
use crate::services::credentials::CredentialDeriver;

/// Transport-neutral view of one inbound call.
#[derive(Debug)]
pub struct RequestEnvelope {
    transport: TransportKind,
    bearer: Option<SecretString>,
    role_id: Option<String>,
    user_id: Option<String>,
    request_id: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl RequestEnvelope {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            bearer: None,
            role_id: None,
            user_id: None,
            request_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn local() -> Self {
        Self::new(TransportKind::Local)
    }

    pub fn networked() -> Self {
        Self::new(TransportKind::Networked)
    }

    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(SecretString::from(token.into()));
        self
    }

    /// Legacy role hint; blank values are ignored.
    #[must_use]
    pub fn with_role_id(mut self, role_id: impl Into<String>) -> Self {
        self.role_id = non_blank(role_id.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = non_blank(user_id.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = non_blank(request_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Identity assumed for unauthenticated calls on the local transport.
#[derive(Debug, Clone)]
pub struct AmbientProfile {
    pub identity: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl AmbientProfile {
    fn claims(&self) -> AuthClaims {
        AuthClaims::ambient(self.identity.clone(), self.roles.clone(), self.is_admin)
    }
}

/// Authentication state reported on the health endpoint.
#[derive(Debug, Serialize)]
pub struct AuthStatus {
    pub token_algorithm: String,
    pub role_exchange_enabled: bool,
    pub ambient_provider_identity: Option<String>,
    pub local_ambient_identity: String,
    pub cache_backend: &'static str,
    pub cached_roles: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct MiddlewareOrchestrator {
    validator: Arc<TokenValidator>,
    deriver: Arc<CredentialDeriver>,
    ambient: AmbientProfile,
}

impl MiddlewareOrchestrator {
    pub fn new(
        validator: Arc<TokenValidator>,
        deriver: Arc<CredentialDeriver>,
        ambient: AmbientProfile,
    ) -> Self {
        Self {
            validator,
            deriver,
            ambient,
        }
    }

    pub fn deriver(&self) -> &CredentialDeriver {
        &self.deriver
    }

    /// Validates and derives for one call, producing its context.
    ///
    /// Only token failures are returned. Credential failures are logged and
    /// recorded in the context; they surface when a tool needs credentials.
    pub async fn open(&self, envelope: RequestEnvelope) -> Result<Arc<RequestContext>, TokenError> {
        let RequestEnvelope {
            transport,
            bearer,
            role_id,
            user_id,
            request_id,
            metadata,
        } = envelope;
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let validated = match &bearer {
            Some(token) => self.validator.validate(token.expose_secret()),
            None => Err(TokenError::Missing),
        };

        let claims = match validated {
            Ok(claims) => claims,
            Err(TokenError::Missing) if transport == TransportKind::Local => {
                tracing::debug!(
                    request_id = %request_id,
                    identity = %self.ambient.identity,
                    "no token on local transport; using ambient identity"
                );
                self.ambient.claims()
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    transport = ?transport,
                    code = err.code(),
                    "token rejected"
                );
                return Err(err);
            }
        };

        let credentials = self.deriver.derive(&claims, role_id.as_deref()).await;
        match &credentials {
            Ok(resolved) => tracing::info!(
                request_id = %request_id,
                identity = %claims.identity(),
                source = resolved.source_label(),
                audit_identity = %resolved.audit_identity(),
                "request authenticated"
            ),
            Err(err) => tracing::warn!(
                request_id = %request_id,
                identity = %claims.identity(),
                code = err.code(),
                error = %err,
                "credential derivation failed; continuing without provider credentials"
            ),
        }

        let ctx = RequestContext::new(request_id, transport, claims, credentials)
            .with_bearer(bearer)
            .with_role_id(role_id)
            .with_user_hint(user_id)
            .with_metadata(metadata);

        Ok(Arc::new(ctx))
    }

    /// `open`, then run `body` inside the bound context.
    ///
    /// The context and legacy bridge are released when `body` finishes, however it finishes.
    pub async fn run<F, Fut>(
        &self,
        envelope: RequestEnvelope,
        body: F,
    ) -> Result<Fut::Output, TokenError>
    where
        F: FnOnce(Arc<RequestContext>) -> Fut,
        Fut: Future,
    {
        let ctx = self.open(envelope).await?;
        Ok(context::with_context(ctx.clone(), body(ctx)).await)
    }

    pub async fn auth_status(&self) -> AuthStatus {
        AuthStatus {
            token_algorithm: self.validator.algorithm(),
            role_exchange_enabled: self.deriver.exchange_enabled(),
            ambient_provider_identity: self
                .deriver
                .ambient_identity()
                .map(|a| a.label().to_owned()),
            local_ambient_identity: self.ambient.identity.clone(),
            cache_backend: self.deriver.cache_backend(),
            cached_roles: self.deriver.cached_roles().await,
            checked_at: Utc::now(),
        }
    }
}

/*
 * Responsibility
 * - Per-request context: claims, credential resolution, transport metadata
 * - Binds it to the current call tree (task-local) for the duration of a body
 * - Publishes/scrubs the legacy identity bridge around the same body
 *
 * Notes
 * - Only code awaited inside `with_context` observes the binding. Work spawned
 *   onto other tasks must receive the context explicitly.
 */
pub mod legacy;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;

use crate::services::auth::AuthClaims;
use crate::services::credentials::{CredentialError, ResolvedCredentials};

use self::legacy::LegacyIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Trusted interactive transport (stdio / loopback); may fall back to the ambient identity.
    Local,
    Networked,
}

/// Everything a tool may know about the request it runs for.
#[derive(Debug)]
pub struct RequestContext {
    request_id: String,
    transport: TransportKind,
    claims: AuthClaims,
    credentials: Result<ResolvedCredentials, CredentialError>,
    bearer: Option<SecretString>,
    role_id: Option<String>,
    user_hint: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new(
        request_id: impl Into<String>,
        transport: TransportKind,
        claims: AuthClaims,
        credentials: Result<ResolvedCredentials, CredentialError>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            transport,
            claims,
            credentials,
            bearer: None,
            role_id: None,
            user_hint: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_bearer(mut self, bearer: Option<SecretString>) -> Self {
        self.bearer = bearer;
        self
    }

    #[must_use]
    pub fn with_role_id(mut self, role_id: Option<String>) -> Self {
        self.role_id = role_id;
        self
    }

    #[must_use]
    pub fn with_user_hint(mut self, user_hint: Option<String>) -> Self {
        self.user_hint = user_hint;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn claims(&self) -> &AuthClaims {
        &self.claims
    }

    /// Derived credentials, or the reason derivation failed.
    pub fn credentials(&self) -> Result<&ResolvedCredentials, &CredentialError> {
        self.credentials.as_ref()
    }

    /// Bearer token to forward on outbound catalog calls.
    pub fn bearer(&self) -> Option<&SecretString> {
        self.bearer.as_ref()
    }

    /// Role requested for this request (legacy header, else the token's role claim).
    pub fn role_id(&self) -> Option<&str> {
        self.role_id.as_deref().or(self.claims.role_hint())
    }

    /// Caller-supplied user id hint, else the verified subject.
    pub fn user_id(&self) -> &str {
        self.user_hint
            .as_deref()
            .unwrap_or_else(|| self.claims.subject())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn legacy_identity(&self) -> LegacyIdentity {
        LegacyIdentity {
            access_token: self.bearer.clone(),
            role_arn: self.role_id().map(str::to_owned),
            user_id: Some(self.user_id().to_owned()),
        }
    }
}

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// Runs `body` with `ctx` bound as the current request context.
///
/// The legacy bridge entry published here is removed when the returned future
/// completes, fails, panics, or is dropped.
pub async fn with_context<F>(ctx: Arc<RequestContext>, body: F) -> F::Output
where
    F: Future,
{
    let _bridge = legacy::publish(ctx.legacy_identity());
    CURRENT.scope(ctx, body).await
}

/// The context bound to the current call tree, if any.
pub fn current() -> Option<Arc<RequestContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Borrows the bound context without cloning the `Arc`.
pub fn try_with<R>(f: impl FnOnce(&RequestContext) -> R) -> Option<R> {
    CURRENT.try_with(|ctx| f(ctx)).ok()
}

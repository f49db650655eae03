use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use crate::services::auth::EmbeddedCredentials;

/// Where a set of provider credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Embedded,
    AssumedRole,
}

/// Time-bounded provider credentials resolved for one identity.
///
/// Never valid past `expires_at`; consumers re-derive (or fail) once expired.
pub struct DerivedCredentials {
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    expires_at: DateTime<Utc>,
    role_id: Option<String>,
    identity: String,
    source: CredentialSource,
}

impl DerivedCredentials {
    /// Credentials lifted as-is from the token.
    pub fn from_embedded(embedded: &EmbeddedCredentials, identity: impl Into<String>) -> Self {
        Self {
            access_key_id: embedded.access_key_id.clone(),
            secret_access_key: embedded.secret_access_key.clone(),
            session_token: embedded.session_token.clone(),
            expires_at: embedded.expires_at,
            role_id: embedded.role_arn.clone(),
            identity: identity.into(),
            source: CredentialSource::Embedded,
        }
    }

    /// Credentials produced by a role exchange.
    pub fn assumed(
        role_id: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: SecretString,
        session_token: SecretString,
        expires_at: DateTime<Utc>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key,
            session_token: Some(session_token),
            expires_at,
            role_id: Some(role_id.into()),
            identity: identity.into(),
            source: CredentialSource::AssumedRole,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &SecretString {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&SecretString> {
        self.session_token.as_ref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn role_id(&self) -> Option<&str> {
        self.role_id.as_deref()
    }

    /// Identity/ARN string used in audit logs.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for DerivedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .field("role_id", &self.role_id)
            .field("identity", &self.identity)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// The process's own provider identity (instance profile, env keys, SSO...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientIdentity {
    label: String,
}

impl AmbientIdentity {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Outcome of a successful derivation.
#[derive(Debug, Clone)]
pub enum ResolvedCredentials {
    Derived(Arc<DerivedCredentials>),
    /// Explicit fallback to the process identity; tool calls use the default provider chain.
    Ambient(AmbientIdentity),
}

impl ResolvedCredentials {
    pub fn source_label(&self) -> &'static str {
        match self {
            Self::Derived(c) => match c.source() {
                CredentialSource::Embedded => "embedded",
                CredentialSource::AssumedRole => "assumed_role",
            },
            Self::Ambient(_) => "ambient",
        }
    }

    pub fn audit_identity(&self) -> &str {
        match self {
            Self::Derived(c) => c.identity(),
            Self::Ambient(a) => a.label(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Derived(c) => Some(c.expires_at()),
            Self::Ambient(_) => None,
        }
    }

    pub fn derived(&self) -> Option<&Arc<DerivedCredentials>> {
        match self {
            Self::Derived(c) => Some(c),
            Self::Ambient(_) => None,
        }
    }
}

/*
 * Responsibility
 * - Typed claims handed to the rest of the gateway after token verification
 * - Embedded provider credentials, whichever field-naming convention the issuer used
 * - Raw (wire) shapes stay private to this module; nothing downstream sees untyped maps
 */
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use serde::Deserialize;

/// Provider credentials carried inside the bearer token.
#[derive(Clone)]
pub struct EmbeddedCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
    /// Role the issuer assumed to produce these credentials, when it says so.
    pub role_arn: Option<String>,
}

impl EmbeddedCredentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for EmbeddedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs
        f.debug_struct("EmbeddedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .field("role_arn", &self.role_arn)
            .finish_non_exhaustive()
    }
}

/// Verified identity for one request.
///
/// Built once by the token validator (or as the ambient identity for the local
/// transport) and never mutated afterwards; the `with_*` methods consume `self`.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    subject: String,
    name: Option<String>,
    email: Option<String>,
    is_admin: bool,
    roles: Vec<String>,
    scopes: Vec<String>,
    role_hint: Option<String>,
    embedded: Option<Arc<EmbeddedCredentials>>,
    expires_at: Option<DateTime<Utc>>,
    fingerprint: Option<String>,
    ambient: bool,
}

impl AuthClaims {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            name: None,
            email: None,
            is_admin: false,
            roles: Vec::new(),
            scopes: Vec::new(),
            role_hint: None,
            embedded: None,
            expires_at: None,
            fingerprint: None,
            ambient: false,
        }
    }

    /// Claims standing in for the process owner on the local transport.
    pub fn ambient(identity: impl Into<String>, roles: Vec<String>, is_admin: bool) -> Self {
        let mut claims = Self::new(identity).with_roles(roles).with_admin(is_admin);
        claims.ambient = true;
        claims
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_role_hint(mut self, role_arn: impl Into<String>) -> Self {
        self.role_hint = Some(role_arn.into());
        self
    }

    #[must_use]
    pub fn with_embedded(mut self, credentials: EmbeddedCredentials) -> Self {
        self.embedded = Some(Arc::new(credentials));
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Human-readable identity for audit logs: name, then email, then subject.
    pub fn identity(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.subject)
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn role_hint(&self) -> Option<&str> {
        self.role_hint.as_deref()
    }

    pub fn embedded(&self) -> Option<&EmbeddedCredentials> {
        self.embedded.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn is_ambient(&self) -> bool {
        self.ambient
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Claims as they appear in the JWT payload.
///
/// No `Debug`: the embedded blocks carry key material.
#[derive(Deserialize)]
pub(super) struct RawClaims {
    pub sub: String,
    pub exp: i64,

    #[serde(default, alias = "preferred_username")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "admin")]
    pub is_admin: bool,
    #[serde(default)]
    pub roles: Vec<String>,

    // Scope strings arrive space-separated (`scope`) or as arrays.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    pub role_arn: Option<String>,

    #[serde(default)]
    pub aws_credentials: Option<SnakeCaseBundle>,
    #[serde(default, rename = "awsCredentials")]
    pub sts_credentials: Option<StsBundle>,
}

#[derive(Deserialize)]
pub(super) struct SnakeCaseBundle {
    access_key_id: String,
    secret_access_key: SecretString,
    #[serde(default)]
    session_token: Option<SecretString>,
    #[serde(default)]
    expiration: Option<Expiration>,
    #[serde(default)]
    role_arn: Option<String>,
}

/// Same block using the field names of an STS `Credentials` response.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct StsBundle {
    access_key_id: String,
    secret_access_key: SecretString,
    #[serde(default)]
    session_token: Option<SecretString>,
    #[serde(default)]
    expiration: Option<Expiration>,
    #[serde(default)]
    role_arn: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(super) enum Expiration {
    Epoch(i64),
    Timestamp(String),
}

impl Expiration {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(secs) => Utc.timestamp_opt(*secs, 0).single(),
            Self::Timestamp(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Whichever embedded block the issuer used, resolved once.
pub(super) enum RawBundle {
    SnakeCase(SnakeCaseBundle),
    Sts(StsBundle),
}

impl RawBundle {
    /// Prefers the snake_case block when an issuer sends both.
    pub fn pick(snake: Option<SnakeCaseBundle>, sts: Option<StsBundle>) -> Option<Self> {
        snake.map(Self::SnakeCase).or(sts.map(Self::Sts))
    }

    /// Converts into typed credentials; `token_expiry` bounds bundles without their own expiry.
    ///
    /// Returns `None` when the bundle's expiration cannot be parsed.
    pub fn into_credentials(self, token_expiry: DateTime<Utc>) -> Option<EmbeddedCredentials> {
        let (access_key_id, secret_access_key, session_token, expiration, role_arn) = match self {
            Self::SnakeCase(b) => (
                b.access_key_id,
                b.secret_access_key,
                b.session_token,
                b.expiration,
                b.role_arn,
            ),
            Self::Sts(b) => (
                b.access_key_id,
                b.secret_access_key,
                b.session_token,
                b.expiration,
                b.role_arn,
            ),
        };

        let expires_at = match expiration {
            Some(exp) => exp.resolve()?,
            None => token_expiry,
        };

        Some(EmbeddedCredentials {
            access_key_id,
            secret_access_key,
            session_token,
            expires_at,
            role_arn: role_arn.filter(|r| !r.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn raw(json: serde_json::Value) -> RawClaims {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn identity_prefers_name_then_email_then_subject() {
        let claims = AuthClaims::new("sub-1");
        assert_eq!(claims.identity(), "sub-1");

        let claims = claims.with_email("alice@example.com");
        assert_eq!(claims.identity(), "alice@example.com");

        let claims = claims.with_name("alice");
        assert_eq!(claims.identity(), "alice");
    }

    #[test]
    fn snake_case_bundle_resolves() {
        let claims = raw(serde_json::json!({
            "sub": "alice",
            "exp": 2_000_000_000,
            "aws_credentials": {
                "access_key_id": "AKIAEXAMPLE",
                "secret_access_key": "secret",
                "session_token": "session",
                "expiration": "2033-05-18T03:33:20Z"
            }
        }));

        let bundle = RawBundle::pick(claims.aws_credentials, claims.sts_credentials).unwrap();
        let creds = bundle
            .into_credentials(Utc.timestamp_opt(claims.exp, 0).unwrap())
            .unwrap();

        assert_eq!(creds.access_key_id, "AKIAEXAMPLE");
        assert_eq!(creds.secret_access_key.expose_secret(), "secret");
        assert_eq!(
            creds.session_token.as_ref().map(|t| t.expose_secret()),
            Some("session")
        );
        assert_eq!(creds.expires_at.timestamp(), 2_000_000_000);
    }

    #[test]
    fn sts_style_bundle_resolves_and_falls_back_to_token_expiry() {
        let claims = raw(serde_json::json!({
            "sub": "bob",
            "exp": 1_900_000_000,
            "awsCredentials": {
                "AccessKeyId": "ASIAEXAMPLE",
                "SecretAccessKey": "secret",
                "RoleArn": "arn:aws:iam::123456789012:role/Reader"
            }
        }));

        let bundle = RawBundle::pick(claims.aws_credentials, claims.sts_credentials).unwrap();
        let creds = bundle
            .into_credentials(Utc.timestamp_opt(claims.exp, 0).unwrap())
            .unwrap();

        assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
        assert!(creds.session_token.is_none());
        assert_eq!(creds.expires_at.timestamp(), 1_900_000_000);
        assert_eq!(
            creds.role_arn.as_deref(),
            Some("arn:aws:iam::123456789012:role/Reader")
        );
    }

    #[test]
    fn unparseable_expiration_is_rejected() {
        let claims = raw(serde_json::json!({
            "sub": "bob",
            "exp": 1_900_000_000,
            "aws_credentials": {
                "access_key_id": "A",
                "secret_access_key": "S",
                "expiration": "next tuesday"
            }
        }));

        let bundle = RawBundle::pick(claims.aws_credentials, claims.sts_credentials).unwrap();
        assert!(bundle.into_credentials(Utc::now()).is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = EmbeddedCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: SecretString::from("very-secret"),
            session_token: Some(SecretString::from("token-secret")),
            expires_at: Utc::now(),
            role_arn: None,
        };

        let out = format!("{:?}", AuthClaims::new("x").with_embedded(creds));
        assert!(!out.contains("very-secret"));
        assert!(!out.contains("token-secret"));
    }
}

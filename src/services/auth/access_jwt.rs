use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::services::auth::claims::{AuthClaims, RawBundle, RawClaims};

/// Token verification failures.
///
/// Each condition is reported separately so the orchestrator can decide
/// between falling back to the ambient identity and failing hard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no bearer token supplied")]
    Missing,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token audience or issuer mismatch")]
    AudienceMismatch,
}

impl TokenError {
    /// Stable code used in caller-visible error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing => "TOKEN_MISSING",
            Self::Malformed(_) => "TOKEN_MALFORMED",
            Self::Expired => "TOKEN_EXPIRED",
            Self::SignatureInvalid => "TOKEN_SIGNATURE_INVALID",
            Self::AudienceMismatch => "TOKEN_AUDIENCE_MISMATCH",
        }
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => TokenError::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
        ErrorKind::InvalidAudience | ErrorKind::InvalidIssuer => TokenError::AudienceMismatch,
        _ => TokenError::Malformed(err.to_string()),
    }
}

/// Key the validator verifies signatures against.
#[derive(Clone)]
pub enum VerificationKey {
    /// Shared HMAC secret (HS256/HS384/HS512).
    Secret(SecretString),
    /// Ed25519 public key in PEM form (EdDSA).
    Ed25519Pem(String),
}

/// Settings for [`TokenValidator`].
pub struct TokenValidatorConfig {
    pub algorithm: Algorithm,
    pub key: VerificationKey,
    pub key_id: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub leeway_seconds: u64,
}

#[derive(Debug, Error)]
#[error("invalid token verification key: {0}")]
pub struct KeyError(String);

/// Bearer-token verifier.
///
/// - Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    key_id: Option<String>,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("TokenValidator")
            .field("validation", &self.validation)
            .field("key_id", &self.key_id)
            .finish()
    }
}

impl TokenValidator {
    pub fn new(config: TokenValidatorConfig) -> Result<Self, KeyError> {
        let decoding_key = match &config.key {
            VerificationKey::Secret(secret) => {
                if secret.expose_secret().is_empty() {
                    return Err(KeyError("empty shared secret".into()));
                }
                DecodingKey::from_secret(secret.expose_secret().as_bytes())
            }
            VerificationKey::Ed25519Pem(pem) => DecodingKey::from_ed_pem(pem.as_bytes())
                .map_err(|e| KeyError(format!("ed25519 public key pem: {e}")))?,
        };

        let mut validation = Validation::new(config.algorithm);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            // Without a configured audience, tokens carrying `aud` would be rejected.
            None => validation.validate_aud = false,
        }
        validation.leeway = config.leeway_seconds;

        Ok(Self {
            decoding_key,
            validation,
            key_id: config.key_id,
        })
    }

    /// Short label of the configured algorithm, for status reporting.
    pub fn algorithm(&self) -> String {
        self.validation
            .algorithms
            .first()
            .map(|alg| format!("{alg:?}"))
            .unwrap_or_default()
    }

    /// Verify a raw bearer token and convert it into [`AuthClaims`].
    ///
    /// `jsonwebtoken::Validation` checks signature, `exp`, and (when configured)
    /// `iss`/`aud`. This method additionally checks:
    /// - the header `kid` matches the configured key id
    /// - `sub` is present and not empty
    /// - an embedded credential block, when present, is well formed
    pub fn validate(&self, raw: &str) -> Result<AuthClaims, TokenError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        if let Some(expected) = &self.key_id
            && header.kid.as_deref() != Some(expected.as_str())
        {
            return Err(TokenError::SignatureInvalid);
        }

        let data = jsonwebtoken::decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenError::Malformed("empty 'sub' claim".into()));
        }

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| TokenError::Malformed("'exp' out of range".into()))?;

        into_auth_claims(claims, expires_at, fingerprint(token))
    }
}

fn into_auth_claims(
    claims: RawClaims,
    expires_at: DateTime<Utc>,
    fingerprint: String,
) -> Result<AuthClaims, TokenError> {
    let mut scopes: Vec<String> = claims
        .scope
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    for s in claims.scopes.into_iter().chain(claims.permissions) {
        if !scopes.contains(&s) {
            scopes.push(s);
        }
    }

    let mut out = AuthClaims::new(claims.sub)
        .with_admin(claims.is_admin)
        .with_roles(claims.roles)
        .with_scopes(scopes)
        .with_expiry(expires_at)
        .with_fingerprint(fingerprint);

    if let Some(name) = claims.name.filter(|n| !n.trim().is_empty()) {
        out = out.with_name(name);
    }
    if let Some(email) = claims.email.filter(|e| !e.trim().is_empty()) {
        out = out.with_email(email);
    }
    if let Some(role_arn) = claims.role_arn.filter(|r| !r.trim().is_empty()) {
        out = out.with_role_hint(role_arn);
    }
    if let Some(bundle) = RawBundle::pick(claims.aws_credentials, claims.sts_credentials) {
        let creds = bundle
            .into_credentials(expires_at)
            .ok_or_else(|| TokenError::Malformed("unreadable credential expiration".into()))?;
        out = out.with_embedded(creds);
    }

    Ok(out)
}

/// Stable, non-reversible token identifier for audit logs.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(16);
    encoded
}

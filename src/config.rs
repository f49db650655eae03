/*
 * Responsibility
 * - Read settings from the environment (.env supported): listen address, token
 *   verification, role exchange, ambient identity, catalog endpoint
 * - Validate them (missing/invalid values fail startup)
 */
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::services::auth::VerificationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: Option<String>) -> Self {
        match value
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Which transport the binary serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Networked HTTP API; every call needs a bearer token.
    Http,
    /// Line-delimited JSON on stdin/stdout for a local, trusted client.
    Stdio,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub transport: Transport,

    pub jwt_algorithm: Algorithm,
    pub jwt_key: VerificationKey,
    pub jwt_key_id: Option<String>,
    pub auth_issuer: Option<String>,
    pub auth_audience: Option<String>,
    pub access_token_leeway_seconds: u64,

    pub role_exchange_enabled: bool,
    pub assume_role_duration: Duration,
    pub role_exchange_timeout: Duration,
    pub credential_cache_margin: Duration,
    pub audit_identity: String,

    pub ambient_identity: String,
    pub ambient_roles: Vec<String>,
    pub ambient_admin: bool,

    pub catalog_url: Option<Url>,
    pub catalog_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port: u16 = parse_or(get("PORT"), "PORT", 3000)?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        let app_env = AppEnv::parse(get("APP_ENV"));

        let transport = match get("GATEWAY_TRANSPORT").as_deref() {
            None | Some("http") => Transport::Http,
            Some("stdio") => Transport::Stdio,
            Some(_) => return Err(ConfigError::Invalid("GATEWAY_TRANSPORT")),
        };

        let jwt_algorithm = match get("JWT_ALGORITHM") {
            None => Algorithm::HS256,
            Some(alg) => {
                Algorithm::from_str(&alg).map_err(|_| ConfigError::Invalid("JWT_ALGORITHM"))?
            }
        };

        let jwt_key = match jwt_algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
                VerificationKey::Secret(SecretString::from(secret))
            }
            Algorithm::EdDSA => {
                let pem = get("JWT_PUBLIC_KEY_PEM")
                    .ok_or(ConfigError::Missing("JWT_PUBLIC_KEY_PEM"))?
                    .replace("\\n", "\n");
                VerificationKey::Ed25519Pem(pem)
            }
            _ => return Err(ConfigError::Invalid("JWT_ALGORITHM")),
        };

        let access_token_leeway_seconds = parse_or(
            get("ACCESS_TOKEN_LEEWAY_SECONDS"),
            "ACCESS_TOKEN_LEEWAY_SECONDS",
            60,
        )?;

        let role_exchange_enabled = parse_bool_or(
            get("AWS_ROLE_EXCHANGE_ENABLED"),
            "AWS_ROLE_EXCHANGE_ENABLED",
            true,
        )?;

        let assume_role_seconds: u64 = parse_or(
            get("ASSUME_ROLE_DURATION_SECONDS"),
            "ASSUME_ROLE_DURATION_SECONDS",
            3600,
        )?;
        // STS accepts 15 minutes to 12 hours.
        if !(900..=43_200).contains(&assume_role_seconds) {
            return Err(ConfigError::Invalid("ASSUME_ROLE_DURATION_SECONDS"));
        }

        let role_exchange_timeout_ms: u64 = parse_or(
            get("ROLE_EXCHANGE_TIMEOUT_MS"),
            "ROLE_EXCHANGE_TIMEOUT_MS",
            5000,
        )?;
        if role_exchange_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ROLE_EXCHANGE_TIMEOUT_MS"));
        }

        let cache_margin_seconds: u64 = parse_or(
            get("CREDENTIAL_CACHE_MARGIN_SECONDS"),
            "CREDENTIAL_CACHE_MARGIN_SECONDS",
            300,
        )?;

        let audit_identity = get("AUDIT_IDENTITY").unwrap_or_else(|| "catalog-gateway".to_string());

        let ambient_identity = get("AMBIENT_IDENTITY").unwrap_or_else(|| "local".to_string());
        let ambient_roles = get("AMBIENT_ROLES")
            .unwrap_or_else(|| "ReadWrite".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let ambient_admin = parse_bool_or(get("AMBIENT_ADMIN"), "AMBIENT_ADMIN", false)?;

        let catalog_url = get("CATALOG_URL")
            .map(|raw| {
                // Keep a trailing slash so relative joins stay under the base path.
                let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
                Url::parse(&raw).map_err(|_| ConfigError::Invalid("CATALOG_URL"))
            })
            .transpose()?;

        let catalog_timeout_ms: u64 =
            parse_or(get("CATALOG_TIMEOUT_MS"), "CATALOG_TIMEOUT_MS", 10_000)?;

        Ok(Self {
            addr,
            app_env,
            transport,
            jwt_algorithm,
            jwt_key,
            jwt_key_id: get("JWT_KEY_ID"),
            auth_issuer: get("AUTH_ISSUER"),
            auth_audience: get("AUTH_AUDIENCE"),
            access_token_leeway_seconds,
            role_exchange_enabled,
            assume_role_duration: Duration::from_secs(assume_role_seconds),
            role_exchange_timeout: Duration::from_millis(role_exchange_timeout_ms),
            credential_cache_margin: Duration::from_secs(cache_margin_seconds),
            audit_identity,
            ambient_identity,
            ambient_roles,
            ambient_admin,
            catalog_url,
            catalog_timeout: Duration::from_millis(catalog_timeout_ms),
        })
    }
}

fn parse_or<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
    }
}

fn parse_bool_or(
    value: Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_with_shared_secret() {
        let cfg = config(&[("JWT_SECRET", "s3cret")]).unwrap();

        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.transport, Transport::Http);
        assert_eq!(cfg.jwt_algorithm, Algorithm::HS256);
        assert!(matches!(cfg.jwt_key, VerificationKey::Secret(_)));
        assert_eq!(cfg.access_token_leeway_seconds, 60);
        assert!(cfg.role_exchange_enabled);
        assert_eq!(cfg.assume_role_duration, Duration::from_secs(3600));
        assert_eq!(cfg.role_exchange_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.credential_cache_margin, Duration::from_secs(300));
        assert_eq!(cfg.audit_identity, "catalog-gateway");
        assert_eq!(cfg.ambient_roles, vec!["ReadWrite"]);
        assert!(!cfg.ambient_admin);
        assert!(cfg.catalog_url.is_none());
    }

    #[test]
    fn key_material_is_required_for_the_algorithm() {
        assert_eq!(config(&[]).err(), Some(ConfigError::Missing("JWT_SECRET")));
        assert_eq!(
            config(&[("JWT_ALGORITHM", "EdDSA"), ("JWT_SECRET", "x")]).err(),
            Some(ConfigError::Missing("JWT_PUBLIC_KEY_PEM"))
        );
        assert_eq!(
            config(&[("JWT_ALGORITHM", "RS256"), ("JWT_SECRET", "x")]).err(),
            Some(ConfigError::Invalid("JWT_ALGORITHM"))
        );
    }

    #[test]
    fn invalid_values_fail_startup() {
        let base = ("JWT_SECRET", "x");
        assert_eq!(
            config(&[base, ("ASSUME_ROLE_DURATION_SECONDS", "60")]).err(),
            Some(ConfigError::Invalid("ASSUME_ROLE_DURATION_SECONDS"))
        );
        assert_eq!(
            config(&[base, ("AWS_ROLE_EXCHANGE_ENABLED", "maybe")]).err(),
            Some(ConfigError::Invalid("AWS_ROLE_EXCHANGE_ENABLED"))
        );
        assert_eq!(
            config(&[base, ("PORT", "http")]).err(),
            Some(ConfigError::Invalid("PORT"))
        );
        assert_eq!(
            config(&[base, ("GATEWAY_TRANSPORT", "carrier-pigeon")]).err(),
            Some(ConfigError::Invalid("GATEWAY_TRANSPORT"))
        );
    }

    #[test]
    fn ambient_and_catalog_settings() {
        let cfg = config(&[
            ("JWT_SECRET", "x"),
            ("GATEWAY_TRANSPORT", "stdio"),
            ("AMBIENT_ROLES", "ReadOnly, Admin"),
            ("AMBIENT_ADMIN", "yes"),
            ("CATALOG_URL", "https://catalog.example.com/api"),
        ])
        .unwrap();

        assert_eq!(cfg.transport, Transport::Stdio);
        assert_eq!(cfg.ambient_roles, vec!["ReadOnly", "Admin"]);
        assert!(cfg.ambient_admin);
        assert_eq!(
            cfg.catalog_url.unwrap().as_str(),
            "https://catalog.example.com/api/"
        );
    }
}

//! Factory: build `TokenValidator` from application `Config`.
use std::sync::Arc;

use crate::config::Config;
use crate::services::auth::{KeyError, TokenValidator, TokenValidatorConfig};

pub fn build_token_validator(config: &Config) -> Result<Arc<TokenValidator>, KeyError> {
    let validator = TokenValidator::new(TokenValidatorConfig {
        algorithm: config.jwt_algorithm,
        key: config.jwt_key.clone(),
        key_id: config.jwt_key_id.clone(),
        issuer: config.auth_issuer.clone(),
        audience: config.auth_audience.clone(),
        leeway_seconds: config.access_token_leeway_seconds,
    })?;

    Ok(Arc::new(validator))
}

//! Role-assumption exchange against AWS STS.
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_sts::config::Credentials;
use aws_sdk_sts::error::{DisplayErrorContext, SdkError};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::services::credentials::types::{AmbientIdentity, DerivedCredentials};

/// Failure of a single exchange call.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The provider answered and refused (trust policy, unknown role, bad session name...).
    #[error("exchange denied: {0}")]
    Denied(String),
    /// The provider could not be reached or did not answer in time.
    #[error("exchange unreachable: {0}")]
    Unreachable(String),
}

/// Parameters of one role-assumption exchange.
#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    /// Unique per exchange so each one is traceable in the provider's audit trail.
    pub session_name: String,
    /// Fixed audit identity tag of this gateway.
    pub source_identity: String,
    pub duration: Duration,
}

/// Temporary credentials returned by the provider.
pub struct AssumedRole {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expires_at: DateTime<Utc>,
    pub assumed_role_arn: Option<String>,
}

/// Exchanges a role identifier for temporary credentials, using the process's
/// ambient identity as the exchange principal.
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// The process identity, when the provider chain found one.
    fn ambient_identity(&self) -> Option<AmbientIdentity>;

    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<AssumedRole, ExchangeError>;

    /// One lightweight "who am I" call made with `credentials`; returns the caller ARN.
    async fn caller_identity(
        &self,
        credentials: &DerivedCredentials,
    ) -> Result<String, ExchangeError>;
}

fn classify<E, R>(err: SdkError<E, R>) -> ExchangeError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(_) => ExchangeError::Denied(detail),
        _ => ExchangeError::Unreachable(detail),
    }
}

/// `RoleAssumer` backed by `aws-sdk-sts`.
#[derive(Clone, Debug)]
pub struct StsRoleAssumer {
    client: aws_sdk_sts::Client,
    ambient: Option<AmbientIdentity>,
}

impl StsRoleAssumer {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        let ambient = sdk_config
            .credentials_provider()
            .map(|_| AmbientIdentity::new("process"));

        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
            ambient,
        }
    }

    /// Loads region and credentials from the standard provider chain.
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(&sdk_config)
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    fn ambient_identity(&self) -> Option<AmbientIdentity> {
        self.ambient.clone()
    }

    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<AssumedRole, ExchangeError> {
        let duration = i32::try_from(request.duration.as_secs()).unwrap_or(i32::MAX);

        let out = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .source_identity(&request.source_identity)
            .duration_seconds(duration)
            .send()
            .await
            .map_err(classify)?;

        let creds = out
            .credentials()
            .ok_or_else(|| ExchangeError::Denied("response carried no credentials".into()))?;

        let expires_at = Utc
            .timestamp_opt(creds.expiration().secs(), 0)
            .single()
            .ok_or_else(|| ExchangeError::Denied("credential expiration out of range".into()))?;

        Ok(AssumedRole {
            access_key_id: creds.access_key_id().to_owned(),
            secret_access_key: SecretString::from(creds.secret_access_key()),
            session_token: SecretString::from(creds.session_token()),
            expires_at,
            assumed_role_arn: out.assumed_role_user().map(|u| u.arn().to_owned()),
        })
    }

    async fn caller_identity(
        &self,
        credentials: &DerivedCredentials,
    ) -> Result<String, ExchangeError> {
        let static_creds = Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key().expose_secret(),
            credentials
                .session_token()
                .map(|t| t.expose_secret().to_owned()),
            Some(SystemTime::from(credentials.expires_at())),
            "catalog-gateway-exchange",
        );

        let conf = self
            .client
            .config()
            .to_builder()
            .credentials_provider(static_creds)
            .build();

        let out = aws_sdk_sts::Client::from_conf(conf)
            .get_caller_identity()
            .send()
            .await
            .map_err(classify)?;

        out.arn()
            .map(str::to_owned)
            .ok_or_else(|| ExchangeError::Denied("caller identity carried no arn".into()))
    }
}

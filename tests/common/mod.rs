#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;

use catalog_gateway::app;
use catalog_gateway::config::Config;
use catalog_gateway::services::context::{self, RequestContext, legacy};
use catalog_gateway::services::credentials::{
    AmbientIdentity, AssumeRoleRequest, AssumedRole, DerivedCredentials, ExchangeError,
    RoleAssumer,
};
use catalog_gateway::state::AppState;
use catalog_gateway::tools::{ToolDispatcher, ToolError, ToolErrorKind, ToolHandler};

pub const SECRET: &str = "integration-secret-integration-secret";
pub const ROLE_A: &str = "arn:aws:iam::123456789012:role/CatalogReaderA";
pub const ROLE_B: &str = "arn:aws:iam::123456789012:role/CatalogReaderB";

/// The legacy bridge is process-wide; tests in one binary run one at a time.
pub static SERIAL: Mutex<()> = Mutex::const_new(());

pub fn config(extra: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::from([
        ("JWT_SECRET".to_string(), SECRET.to_string()),
        ("AMBIENT_IDENTITY".to_string(), "local-dev".to_string()),
        ("AMBIENT_ROLES".to_string(), "ReadOnly".to_string()),
    ]);
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

pub fn mint(claims: Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn token_for(sub: &str, roles: &[&str]) -> String {
    mint(json!({
        "sub": sub,
        "name": sub,
        "roles": roles,
        "exp": (Utc::now() + chrono::Duration::minutes(10)).timestamp(),
    }))
}

/// Token carrying its own credential bundle.
pub fn token_with_bundle(sub: &str, roles: &[&str], access_key_id: &str) -> String {
    mint(json!({
        "sub": sub,
        "name": sub,
        "roles": roles,
        "exp": (Utc::now() + chrono::Duration::minutes(10)).timestamp(),
        "aws_credentials": {
            "access_key_id": access_key_id,
            "secret_access_key": format!("{sub}-secret-access-key"),
            "session_token": format!("{sub}-session-token"),
            "expiration": (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        },
    }))
}

/// In-memory role exchange. Each call hands out a distinct key id.
pub struct FakeAssumer {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub deny: bool,
}

impl FakeAssumer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            deny: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleAssumer for FakeAssumer {
    fn ambient_identity(&self) -> Option<AmbientIdentity> {
        Some(AmbientIdentity::new("process"))
    }

    async fn assume_role(&self, request: &AssumeRoleRequest) -> Result<AssumedRole, ExchangeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.deny {
            return Err(ExchangeError::Denied("AccessDenied: not trusted".into()));
        }
        Ok(AssumedRole {
            access_key_id: format!("ASIAFAKE{n:04}"),
            secret_access_key: SecretString::from(format!("assumed-secret-{n}")),
            session_token: SecretString::from(format!("assumed-session-{n}")),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            assumed_role_arn: Some(format!("{}/{}", request.role_arn, request.session_name)),
        })
    }

    async fn caller_identity(
        &self,
        credentials: &DerivedCredentials,
    ) -> Result<String, ExchangeError> {
        Ok(format!("assumed:{}", credentials.role_id().unwrap_or("-")))
    }
}

/// A catalog tool that needs provider credentials. Reports what the bound
/// context looks like from inside the call.
pub struct ObjectsTool(pub &'static str);

#[async_trait]
impl ToolHandler for ObjectsTool {
    fn name(&self) -> &'static str {
        self.0
    }

    fn description(&self) -> &'static str {
        "List objects in a bucket"
    }

    async fn invoke(&self, params: Value, ctx: &RequestContext) -> Result<Value, ToolError> {
        let creds = ctx
            .credentials()
            .map_err(|err| ToolError::new(ToolErrorKind::NoCredentialSource, err.to_string()))?;

        // Yield so concurrent requests interleave on the runtime.
        tokio::task::yield_now().await;

        let bound_subject = context::try_with(|bound| bound.claims().subject().to_owned());
        let bridge_user = legacy::current().and_then(|id| {
            id.vars()
                .into_iter()
                .find(|(name, _)| *name == legacy::USER_ID_VAR)
                .and_then(|(_, value)| value.map(str::to_owned))
        });

        Ok(json!({
            "bucket": params.get("bucket"),
            "subject": ctx.claims().subject(),
            "bound_subject": bound_subject,
            "bridge_user": bridge_user,
            "source": creds.source_label(),
            "audit_identity": creds.audit_identity(),
            "access_key_id": creds.derived().map(|c| c.access_key_id().to_owned()),
        }))
    }
}

/// Full application state with the object tools registered next to the built-ins.
pub fn state(config: &Config, assumer: Arc<FakeAssumer>) -> AppState {
    let base = app::build_state(config, assumer).unwrap();

    let mut dispatcher = ToolDispatcher::new(base.dispatcher.gate().clone());
    catalog_gateway::tools::builtin::register_builtins(
        &mut dispatcher,
        catalog_gateway::services::catalog_client::CatalogClient::new(
            None,
            Duration::from_secs(1),
        )
        .unwrap(),
    );
    dispatcher.register(Arc::new(ObjectsTool("bucket_objects_list")));
    dispatcher.register(Arc::new(ObjectsTool("bucket_objects_put")));

    AppState::new(base.orchestrator, Arc::new(dispatcher))
}

pub fn router(state: AppState) -> Router {
    app::build_router(state)
}

pub async fn send(router: &Router, req: Request<Body>) -> (Response<()>, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (Response::from_parts(parts, ()), json)
}

pub fn invoke(tool: &str, token: Option<&str>) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/tools/{tool}"))
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
}

pub fn invoke_request(tool: &str, token: Option<&str>, body: Value) -> Request<Body> {
    invoke(tool, token).body(Body::from(body.to_string())).unwrap()
}

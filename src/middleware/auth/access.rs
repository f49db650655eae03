//! Bearer token → request context, bound for the rest of the request.
//!
//! - Reads `Authorization: Bearer <jwt>` plus the optional `x-catalog-role-arn` and
//!   `x-catalog-user-id` hints.
//! - The orchestrator validates the token and derives credentials; the resulting context goes
//!   into request extensions (for the extractor) and the task-local scope (for tools).
//! - The scope is released when the inner service returns, on every path.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::error::AppError;
use crate::middleware::http::REQUEST_ID_HEADER;
use crate::services::auth::TokenError;
use crate::services::context;
use crate::services::orchestrator::RequestEnvelope;
use crate::state::AppState;

pub const ROLE_HEADER: &str = "x-catalog-role-arn";
pub const USER_HEADER: &str = "x-catalog-user-id";

/// Applies the request-context middleware to every route of `router`.
///
/// ```ignore
/// let v1 = api::v1::routes::router();
/// let v1 = middleware::auth::access::apply(v1, state.clone());
/// app = app.nest("/api/v1", v1);
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8: `from_fn` cannot take a State extractor, so pass the state explicitly.
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let envelope = envelope_from_request(&req)?;

    let ctx = state.orchestrator.open(envelope).await?;

    // middleware → extractor
    req.extensions_mut().insert(ctx.clone());

    Ok(context::with_context(ctx, next.run(req)).await)
}

fn envelope_from_request(req: &Request<Body>) -> Result<RequestEnvelope, TokenError> {
    let headers = req.headers();
    let mut envelope = RequestEnvelope::networked()
        .with_metadata("method", req.method().as_str())
        .with_metadata("path", req.uri().path());

    if let Some(token) = bearer_token(headers)? {
        envelope = envelope.with_bearer(token);
    }
    if let Some(role) = header_str(headers, ROLE_HEADER) {
        envelope = envelope.with_role_id(role);
    }
    if let Some(user) = header_str(headers, USER_HEADER) {
        envelope = envelope.with_user_id(user);
    }
    if let Some(request_id) = header_str(headers, REQUEST_ID_HEADER) {
        envelope = envelope.with_request_id(request_id);
    }
    if let Some(agent) = header_str(headers, header::USER_AGENT.as_str()) {
        envelope = envelope.with_metadata("user_agent", agent);
    }

    Ok(envelope)
}

/// `Ok(None)` when the header is absent; any other scheme is malformed.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, TokenError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| TokenError::Malformed("authorization header is not ascii".into()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Ok(Some(token.trim())),
        _ => Err(TokenError::Malformed(
            "authorization scheme must be Bearer".into(),
        )),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/*
 * Responsibility
 * - Hands handlers the request context the access middleware built
 * - A route mounted without the middleware is rejected as unauthenticated
 */
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::services::auth::TokenError;
use crate::services::context::RequestContext;

#[derive(Debug, Clone)]
pub struct RequestCtx(pub Arc<RequestContext>);

impl<S> FromRequestParts<S> for RequestCtx
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<RequestContext>>()
            .cloned()
            .map(Self)
            .ok_or(AppError::Unauthorized(TokenError::Missing))
    }
}

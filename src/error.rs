/*
 * Responsibility
 * - HTTP-boundary error type (AppError)
 * - IntoResponse (status + JSON error body)
 * - Converts token and tool failures into caller-visible, secret-free errors
 */
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::auth::TokenError;
use crate::tools::{ToolError, ToolErrorKind};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("unauthorized: {0}")]
    Unauthorized(TokenError),
    #[error("tool error: {0}")]
    Tool(ToolError),
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, reason) = match self {
            AppError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, code, message, None)
            }
            AppError::Unauthorized(err) => {
                let code = err.code();
                // Malformed-token detail can echo token fragments; keep it in logs only.
                let message = match err {
                    TokenError::Malformed(_) => "malformed token".to_string(),
                    other => other.to_string(),
                };
                let body = ErrorResponse {
                    error: ErrorBody {
                        code,
                        message,
                        reason: None,
                    },
                };
                let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer"),
                );
                return response;
            }
            AppError::Tool(err) => {
                let status = match err.kind {
                    ToolErrorKind::UnknownTool => StatusCode::NOT_FOUND,
                    ToolErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                    ToolErrorKind::NoCredentialSource => StatusCode::SERVICE_UNAVAILABLE,
                    ToolErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
                    ToolErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    ToolErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind.as_str(), err.message, err.reason)
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                reason,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(e)
    }
}

impl From<ToolError> for AppError {
    fn from(e: ToolError) -> Self {
        AppError::Tool(e)
    }
}

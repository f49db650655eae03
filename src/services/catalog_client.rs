/*
 * Responsibility
 * - Single integration point for outbound calls to the catalog API
 * - Every request carries the current request's bearer token and request id
 */
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::services::context::RequestContext;

#[derive(Debug, Error)]
pub enum CatalogClientError {
    #[error("catalog url is not configured")]
    NotConfigured,
    #[error("request carries no bearer token for the catalog")]
    MissingToken,
    #[error("invalid catalog path: {0}")]
    InvalidPath(String),
    #[error("catalog denied the request: status {0}")]
    Denied(StatusCode),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    base_url: Option<Url>,
    client: Client,
}

impl CatalogClient {
    pub fn new(
        base_url: Option<Url>,
        request_timeout: Duration,
    ) -> Result<Self, CatalogClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()
            .map_err(|err| CatalogClientError::Unavailable(err.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// A request to `path` under the catalog base URL, authenticated as `ctx`.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<RequestBuilder, CatalogClientError> {
        let base = self.base_url.as_ref().ok_or(CatalogClientError::NotConfigured)?;
        let token = ctx.bearer().ok_or(CatalogClientError::MissingToken)?;

        let url = base
            .join(path.trim_start_matches('/'))
            .map_err(|_| CatalogClientError::InvalidPath(path.to_owned()))?;

        let mut authorization =
            HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| CatalogClientError::MissingToken)?;
        authorization.set_sensitive(true);

        Ok(self
            .client
            .request(method, url)
            .header(AUTHORIZATION, authorization)
            .header("x-request-id", ctx.request_id()))
    }

    pub async fn get_json(
        &self,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<Value, CatalogClientError> {
        let response = self
            .request(Method::GET, path, ctx)?
            .send()
            .await
            .map_err(|err| CatalogClientError::Unavailable(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|err| CatalogClientError::Unavailable(err.to_string())),
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Err(CatalogClientError::Denied(status))
            }
            status => Err(CatalogClientError::Unavailable(format!("status {status}"))),
        }
    }
}

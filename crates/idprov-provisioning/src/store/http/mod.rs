//! HTTP store adapters
//!
//! Shared plumbing for the auth admin client and the table REST client:
//! client construction, endpoint building and response classification.
//!
//! Classification:
//! - 2xx: success, body decoded (an undecodable body is `Unavailable`)
//! - 404: `NotFound`
//! - 409, or a duplicate-key body (`23505`, `email_exists`, "already
//!   registered"): `AlreadyExists`
//! - 408, 429, 5xx, timeouts and connection errors: `Unavailable`
//! - any other 4xx: `Rejected`

use std::time::Duration;

use idprov_common::Resource;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::error::{StoreError, StoreResult};

mod credentials;
mod records;

pub use credentials::AuthAdminClient;
pub use records::RecordStoreClient;

/// Error building an HTTP store adapter.
#[derive(Error, Debug)]
pub enum HttpStoreError {
    #[error("Invalid base URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Connection settings shared by both adapters.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    base: Url,
    service_key: String,
}

impl Endpoint {
    pub(crate) fn new(base_url: &str, service_key: &str) -> Result<Self, HttpStoreError> {
        let base = Url::parse(base_url.trim()).map_err(|e| HttpStoreError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(HttpStoreError::InvalidUrl {
                url: base_url.to_string(),
                message: "URL cannot carry a path".to_string(),
            });
        }
        Ok(Self {
            base,
            service_key: service_key.to_string(),
        })
    }

    /// Base URL with `segments` appended as percent-encoded path segments.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Attach the service key as `apikey` and bearer token.
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }
}

pub(crate) fn build_client(timeout_ms: u64, connect_timeout_ms: u64) -> Result<Client, HttpStoreError> {
    Ok(Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .pool_max_idle_per_host(10)
        .build()?)
}

/// Send a request, turning transport failures into `StoreError`.
pub(crate) async fn send(resource: Resource, request: RequestBuilder) -> StoreResult<Response> {
    request
        .send()
        .await
        .map_err(|e| classify_transport(resource, &e))
}

/// Decode a successful JSON response or classify the failure.
pub(crate) async fn read_json<T: DeserializeOwned>(
    resource: Resource,
    key: &str,
    response: Response,
) -> StoreResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| classify_transport(resource, &e))?;

    if !status.is_success() {
        return Err(classify_status(resource, key, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        warn!(%resource, key, error = %e, "Undecodable store response");
        StoreError::unavailable(resource, format!("malformed response: {}", e))
    })
}

/// Require a successful status and discard the body.
pub(crate) async fn expect_success(
    resource: Resource,
    key: &str,
    response: Response,
) -> StoreResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(resource, key, status, &body))
}

pub(crate) fn classify_transport(resource: Resource, err: &reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::unavailable(resource, "request timeout")
    } else if err.is_connect() {
        StoreError::unavailable(resource, format!("connection error: {}", err))
    } else if err.is_builder() {
        StoreError::rejected(resource, format!("invalid request: {}", err))
    } else {
        StoreError::unavailable(resource, format!("request failed: {}", err))
    }
}

pub(crate) fn classify_status(
    resource: Resource,
    key: &str,
    status: StatusCode,
    body: &str,
) -> StoreError {
    let code = status.as_u16();

    if is_duplicate_body(body) {
        return StoreError::already_exists(resource, key);
    }
    if code == 409 {
        // A bare 409 is a uniqueness conflict; any other constraint code is permanent
        return match error_code(body) {
            None => StoreError::already_exists(resource, key),
            Some(constraint) => StoreError::rejected(
                resource,
                format!("HTTP 409 ({}): {}", constraint, error_message(body)),
            ),
        };
    }
    if code == 404 {
        return StoreError::not_found(resource, key);
    }

    let message = format!("HTTP {}: {}", code, error_message(body));
    if code == 408 || code == 429 || status.is_server_error() {
        StoreError::unavailable(resource, message)
    } else {
        StoreError::rejected(resource, message)
    }
}

/// Uniqueness violation codes from the table API and the auth provider.
const DUPLICATE_CODES: [&str; 3] = ["23505", "email_exists", "user_already_exists"];

/// String error code of a JSON error body (`error_code` wins over `code`).
fn error_code(body: &str) -> Option<String> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    ["error_code", "code"]
        .iter()
        .find_map(|field| json.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn is_duplicate_body(body: &str) -> bool {
    if let Some(code) = error_code(body) {
        return DUPLICATE_CODES.contains(&code.as_str());
    }
    let text = error_message(body).to_ascii_lowercase();
    text.contains("already been registered") || text.contains("already registered")
}

/// Best human-readable message from an error body.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["msg", "message", "error_description", "error"] {
            if let Some(text) = json.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.chars().take(200).collect()
}

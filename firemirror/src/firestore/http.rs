//! HTTP transport for the Firestore REST API
//!
//! Responsible for
//!  - attaching bearer tokens
//!  - logging/tracing of request and response bodies
//!  - retries and backoff (for timeouts, connection errors and busy servers)
//!  - mapping error responses into `StoreError`s

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, de::DeserializeOwned};
use snafu::prelude::*;
use tracing::{debug, error, trace, warn};

use super::auth::TokenProvider;
use crate::{config::HTTP_JSON_TARGET, error::{HttpSnafu, StoreError}};

/// status codes where it's ok to retry and backoff
fn retry_for_status(code: StatusCode) -> bool {
    matches!(
        code,
        StatusCode::REQUEST_TIMEOUT /* 408 */
            | StatusCode::TOO_MANY_REQUESTS /* 429 */
            | StatusCode::INTERNAL_SERVER_ERROR /* 500 */
            | StatusCode::BAD_GATEWAY /* 502 */
            | StatusCode::SERVICE_UNAVAILABLE /* 503 */
            | StatusCode::GATEWAY_TIMEOUT /* 504 */
    )
}

#[derive(Clone)]
pub(crate) struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Vec<u8>>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body", &self.body.as_ref().map_or(0, Vec::len))
            .finish()
    }
}

impl HttpRequest {
    pub(crate) fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
        }
    }

    pub(crate) fn with_json<B: serde::Serialize>(
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<Self, StoreError> {
        let body = serde_json::to_vec(body).map_err(|err| StoreError::Other {
            message: format!("serializing request body: {err}"),
        })?;
        Ok(Self {
            method,
            url,
            body: Some(body),
        })
    }
}

/// Error body returned by Google APIs.
#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) if !error.status.is_empty() => {
            format!("{}: {}", error.status, error.message)
        }
        Ok(ErrorResponse { error }) => error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[derive(Debug)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    tokens: TokenProvider,
    max_retries: u32,
}

impl HttpClient {
    pub(crate) fn new(client: reqwest::Client, tokens: TokenProvider, max_retries: u32) -> Self {
        Self {
            client,
            tokens,
            max_retries,
        }
    }

    /// Sends a Firestore request and deserializes the response body.
    ///
    /// Every request this crate makes is a read or a full-document overwrite,
    /// so all of them are safe to retry.
    /// - retries up to `max_retries` times for connection failures, timeouts
    ///   and the statuses in `retry_for_status`
    /// - maps http error codes into `StoreError`s
    /// - deserializes json response body into return type T
    pub(crate) async fn send<T: DeserializeOwned>(&self, req: HttpRequest) -> Result<T, StoreError> {
        let mut attempt = 0u32;
        log_request(&req);

        loop {
            let token = self.tokens.access_token().await?;
            let mut builder = self
                .client
                .request(req.method.clone(), req.url.clone())
                .bearer_auth(token.as_str());
            if let Some(body) = &req.body {
                builder = builder
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }

            match builder.send().await {
                Ok(response) => {
                    let code = response.status();
                    if code.is_success() {
                        let body = response.bytes().await.context(HttpSnafu {
                            method: req.method.to_string(),
                            url: req.url.as_str(),
                        })?;
                        log_response(req.url.as_str(), &body);
                        // deserialization failure should not be retried
                        return deserialize_json(&body);
                    }

                    let message = error_message(&response.text().await.unwrap_or_default());
                    error!(?code, ?req, message, attempt, "http");
                    match code {
                        StatusCode::NOT_FOUND => {
                            return Err(StoreError::NotFound {
                                address: req.url.path().to_string(),
                            });
                        }
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            return Err(StoreError::Auth {
                                message: format!("{code}: {message}"),
                            });
                        }
                        code if retry_for_status(code) => {
                            if attempt < self.max_retries {
                                log_and_backoff(attempt, code.to_string()).await;
                                attempt += 1;
                                continue;
                            }
                            return Err(StoreError::TooManyRetries {
                                n: attempt + 1,
                                message: format!("{code} {} {}: {message}", req.method, req.url),
                            });
                        }
                        _ => {
                            return Err(StoreError::Api {
                                status: code.as_u16(),
                                method: req.method.to_string(),
                                url: req.url.to_string(),
                                message,
                            });
                        }
                    }
                }
                Err(e) => {
                    error!(source=?e, ?req, "http");
                    if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries {
                        log_and_backoff(attempt, e.to_string()).await;
                        attempt += 1;
                        continue;
                    }
                    // Other non-recoverable errors (e.g., DNS error, invalid URL, etc.)
                    return Err(StoreError::Http {
                        method: req.method.to_string(),
                        url: req.url.to_string(),
                        source: e,
                    });
                }
            }
        }
    }
}

// dump request
// requires RUST_LOG=firemirror::http_json=trace
fn log_request(req: &HttpRequest) {
    if tracing::enabled!(target: HTTP_JSON_TARGET, tracing::Level::TRACE) {
        let body = req
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .unwrap_or_default();
        // headers carry the bearer token and are never logged
        trace!(target: HTTP_JSON_TARGET, "{} url={} body={body}", req.method, req.url);
    }
}

// dump json response, for debugging
fn log_response(url: &str, body: &[u8]) {
    if tracing::enabled!(target: HTTP_JSON_TARGET, tracing::Level::TRACE) {
        trace!(target: HTTP_JSON_TARGET, "Response url={url} body={}",
            String::from_utf8_lossy(body)
        );
    }
}

// deserialize, reporting errors with 'serde_path_to_error', which provides
// detailed json path to the error
pub(crate) fn deserialize_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, StoreError> {
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    match serde_path_to_error::deserialize(&mut deserializer) {
        Ok(value) => Ok(value),
        Err(err) => {
            error!("Deserialization failed at {}: {}", err.path(), err);
            Err(StoreError::Deserialization {
                path: err.path().to_string(),
                source: err.into_inner(),
            })
        }
    }
}

// log attempt and sleep for exponential backoff
async fn log_and_backoff(attempt: u32, err: String) {
    let delay = backoff_delay(attempt);
    warn!("Recoverable error {err}. Attempt {attempt}. Waiting {delay}s before retry");
    tokio::time::sleep(Duration::from_secs(delay)).await;
}

// exponential backoff: 1s, 2s, 4s, with jitter
fn backoff_delay(attempt: u32) -> u64 {
    let base_delay = 2u64.saturating_pow(attempt);
    let jitter = f64::from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    ) / 1_000_000_000.0;
    debug!(attempt, jitter, "backoff");
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let jittered_delay = ((base_delay as f64) * (0.5 + jitter)).round() as u64;
    jittered_delay.max(1)
}

//! Blocking HTTP transport with bounded timeouts and optional retries.

use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::{thread, time::Duration};
use thiserror::Error;

/// Request headers we never forward from a captured browser session.
const SKIPPED_HEADERS: [&str; 3] = ["accept-encoding", "content-length", "host"];

/// A response reduced to what the pipeline looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// The URL after following redirects.
    pub final_url: String,
    pub body: String,
}

impl RawResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: &'static str,
    pub message: String,
}

/// The seam between the pipeline and the network.
pub trait Transport {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<RawResponse, TransportError>;

    fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<RawResponse, TransportError>;
}

/// Helper function to determine if an error is retry-able
/// - `is_timeout()` catches typical network timeouts
/// - `is_connect()` catches typical connection failures
fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

/// Helper function to classify reqwest error types
fn error_type_str(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection"
    } else if e.is_request() {
        "request/DNS"
    } else if e.is_redirect() {
        "redirect"
    } else if e.is_body() {
        "body"
    } else if e.is_decode() {
        "decode"
    } else {
        "unknown"
    }
}

/// Send a request, retrying network errors and 5xx responses with exponential backoff.
/// `max_attempts` of 1 means a single try.
fn retry_request<F>(request_fn: F, max_attempts: u32) -> Result<RawResponse, TransportError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match request_fn().send() {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() && attempts < max_attempts {
                    let sleep_secs = 2_u64.pow(attempts.saturating_sub(1));
                    warn!(
                        "Server error ({status}), retrying in {sleep_secs} seconds... (attempt {attempts}/{max_attempts})"
                    );
                    thread::sleep(Duration::from_secs(sleep_secs));
                    continue;
                }
                let final_url = response.url().to_string();
                let body = response.text().map_err(|e| TransportError {
                    kind: error_type_str(&e),
                    message: format!("could not read response body: {e}"),
                })?;
                return Ok(RawResponse {
                    status: status.as_u16(),
                    final_url,
                    body,
                });
            }
            Err(e) => {
                if is_retryable_error(&e) && attempts < max_attempts {
                    let sleep_secs = 2_u64.pow(attempts.saturating_sub(1));
                    warn!(
                        "Network error ({}), retrying in {} seconds... (attempt {}/{}): {}",
                        error_type_str(&e),
                        sleep_secs,
                        attempts,
                        max_attempts,
                        e
                    );
                    thread::sleep(Duration::from_secs(sleep_secs));
                    continue;
                }
                return Err(TransportError {
                    kind: error_type_str(&e),
                    message: format!("after {attempts} attempts: {e}"),
                });
            }
        }
    }
}

/// Convert string pairs into a header map, dropping headers that would confuse the request.
///
/// # Errors
///
/// Returns an error if a header name or value is not valid HTTP.
pub fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError {
            kind: "header",
            message: format!("invalid header name {name:?}: {e}"),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| TransportError {
            kind: "header",
            message: format!("invalid value for header {name:?}: {e}"),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// The real transport, backed by a blocking `reqwest` client.
pub struct ReqwestTransport {
    client: Client,
    max_attempts: u32,
}

impl ReqwestTransport {
    /// Build a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration, max_attempts: u32) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError {
                kind: "client",
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
        })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<RawResponse, TransportError> {
        let header_values = header_map(headers)?;
        debug!("GET {url}");
        retry_request(
            || self.client.get(url).headers(header_values.clone()),
            self.max_attempts,
        )
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<RawResponse, TransportError> {
        let header_values = header_map(headers)?;
        debug!("POST {url} ({} bytes)", body.len());
        retry_request(
            || {
                self.client
                    .post(url)
                    .headers(header_values.clone())
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(body.clone())
            },
            self.max_attempts,
        )
    }
}

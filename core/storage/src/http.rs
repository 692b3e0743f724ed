//! HTTP plumbing shared by the REST adapters.

use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use drivelink_common::{Error, Result};

use crate::config::HttpConfig;
use crate::provider::ByteStream;

/// Build the adapter client.
///
/// There is no total deadline: downloads may take as long as bytes keep
/// arriving. Connecting and every read are bounded by the configured
/// timeout. Metadata calls add a per-request deadline with
/// [`HttpConfig::timeout`].
pub(crate) fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.timeout())
        .read_timeout(config.timeout())
        .build()
        .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport error, separating timeouts.
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{}: {}", context, err))
    } else {
        Error::Network(format!("{}: {}", context, err))
    }
}

/// Turn a non-success response into the matching error.
///
/// `subject` names the requested resource for `FileNotFound`.
pub(crate) async fn check_status(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, subject, &body))
}

pub(crate) fn status_error(status: StatusCode, subject: &str, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::FileNotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED => {
            Error::AuthenticationFailed("Invalid or expired token".to_string())
        }
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("Access denied: {}", subject)),
        StatusCode::TOO_MANY_REQUESTS => Error::Network(format!("Rate limited: {}", body)),
        s if s.is_server_error() => Error::Network(format!("API error: {} - {}", s, body)),
        s => Error::InvalidInput(format!("API error: {} - {}", s, body)),
    }
}

/// Check the status and decode a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, subject: &str) -> Result<T> {
    let response = check_status(response, subject).await?;
    response
        .json()
        .await
        .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
}

/// Convert a successful response body into a [`ByteStream`].
pub(crate) fn body_stream(response: Response) -> ByteStream {
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| transport_error("Stream read error", e)));
    Box::pin(stream)
}

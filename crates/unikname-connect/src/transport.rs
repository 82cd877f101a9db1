//! Shared HTTP plumbing for provider calls.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};

use crate::config::EngineConfig;
use crate::error::ConnectError;

/// Builds the HTTP client used for discovery, JWKS and token requests.
///
/// Redirects are not followed: provider endpoints must answer directly.
///
/// # Errors
///
/// Returns `Configuration` if the TLS backend cannot be initialized.
pub fn build_http_client(config: &EngineConfig) -> Result<Client, ConnectError> {
    Client::builder()
        .timeout(config.bounded_request_timeout())
        .connect_timeout(config.bounded_request_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("unikname-connect/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConnectError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Returns `true` for transport failures worth one more attempt.
///
/// HTTP error statuses never reach here; they are responses, not errors.
#[must_use]
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Sends a request, retrying up to `max_retries` times on transient failures.
///
/// `build` is called once per attempt because a sent request is consumed.
pub async fn send_with_retry<F>(
    max_retries: u32,
    target: &str,
    mut build: F,
) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match build().send().await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < max_retries && is_transient(&e) => {
                attempt += 1;
                tracing::debug!(
                    url = %target,
                    attempt,
                    error = %e,
                    "Transient transport failure, retrying"
                );
                tokio::time::sleep(retry_backoff(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * u64::from(attempt))
}

/// Error from [`read_limited`].
#[derive(Debug)]
pub enum ReadError {
    /// The body is larger than allowed.
    TooLarge,
    /// The body could not be read.
    Transport(reqwest::Error),
}

/// Reads a response body, rejecting anything over `max_size` bytes.
///
/// The body is streamed, so a chunked response is dropped as soon as it
/// passes the limit instead of being buffered whole.
pub async fn read_limited(response: Response, max_size: usize) -> Result<Vec<u8>, ReadError> {
    if let Some(len) = response.content_length()
        && usize::try_from(len).map_or(true, |len| len > max_size)
    {
        return Err(ReadError::TooLarge);
    }

    collect_limited(response.bytes_stream(), max_size).await
}

async fn collect_limited<S, B>(stream: S, max_size: usize) -> Result<Vec<u8>, ReadError>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ReadError::Transport)?;
        if body.len() + chunk.as_ref().len() > max_size {
            return Err(ReadError::TooLarge);
        }
        body.extend_from_slice(chunk.as_ref());
    }
    Ok(body)
}

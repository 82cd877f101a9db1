//! Authorization code exchange.
//!
//! Server-to-server POST to the provider token endpoint. The client secret
//! and the returned tokens are never written to logs; failures carry only the
//! OAuth error code and description reported by the provider.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Deserialize;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::ConnectResult;
use crate::config::{EngineConfig, ProviderConfig};
use crate::error::ConnectError;
use crate::oidc::OidcDiscoveryDocument;
use crate::pkce::PkceVerifier;
use crate::transport::{ReadError, read_limited, send_with_retry};

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    #[serde(default)]
    pub token_type: String,

    /// Token expiration in seconds.
    pub expires_in: Option<u64>,

    /// Optional refresh token.
    pub refresh_token: Option<String>,

    /// The ID token (JWT).
    pub id_token: String,

    /// Granted scopes.
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientAuth {
    Basic,
    Post,
}

impl ClientAuth {
    /// Prefers `client_secret_basic`, falling back to `client_secret_post`
    /// when that is all the provider advertises.
    fn for_provider(discovery: &OidcDiscoveryDocument) -> Self {
        if !discovery.supports_token_auth_method("client_secret_basic")
            && discovery.supports_token_auth_method("client_secret_post")
        {
            Self::Post
        } else {
            Self::Basic
        }
    }
}

/// Exchanges authorization codes for tokens.
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http_client: Client,
    max_response_size: usize,
    max_retries: u32,
}

impl TokenExchangeClient {
    /// Creates a client using `http_client` and the engine limits.
    #[must_use]
    pub fn new(http_client: Client, config: &EngineConfig) -> Self {
        Self {
            http_client,
            max_response_size: config.max_response_size,
            max_retries: config.max_retries,
        }
    }

    /// Exchanges `code` at the provider token endpoint.
    ///
    /// The token scope is sent only when configured.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on transport failure, non-success status
    /// or an unreadable response body.
    pub async fn exchange(
        &self,
        config: &ProviderConfig,
        discovery: &OidcDiscoveryDocument,
        code: &str,
        verifier: &PkceVerifier,
        redirect_uri: &Url,
    ) -> ConnectResult<TokenResponse> {
        let token_endpoint = Url::parse(&discovery.token_endpoint)
            .map_err(|e| ConnectError::token_exchange(format!("invalid token endpoint: {e}")))?;

        let auth = ClientAuth::for_provider(discovery);

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", config.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        if auth == ClientAuth::Post {
            params.push(("client_secret", config.client_secret()));
        }
        if let Some(scope) = &config.token_scope {
            params.push(("scope", scope.as_str()));
        }

        tracing::debug!(
            endpoint = %token_endpoint,
            client_auth = ?auth,
            "Exchanging authorization code"
        );

        let response = send_with_retry(self.max_retries, token_endpoint.as_str(), || {
            let request = self
                .http_client
                .post(token_endpoint.as_str())
                .header("Accept", "application/json")
                .form(&params);
            match auth {
                ClientAuth::Basic => request.header(
                    reqwest::header::AUTHORIZATION,
                    basic_credentials(&config.client_id, config.client_secret()),
                ),
                ClientAuth::Post => request,
            }
        })
        .await
        .map_err(|e| {
            tracing::warn!(endpoint = %token_endpoint, error = %e, "Token request failed");
            if e.is_timeout() {
                ConnectError::token_exchange("token endpoint timed out")
            } else {
                ConnectError::token_exchange(format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        let body = read_limited(response, self.max_response_size)
            .await
            .map_err(|e| match e {
                ReadError::TooLarge => ConnectError::token_exchange("token response too large"),
                ReadError::Transport(e) => {
                    ConnectError::token_exchange(format!("failed to read token response: {e}"))
                }
            })?;

        if !status.is_success() {
            let message = match serde_json::from_slice::<OAuthErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) if !description.is_empty() => {
                        format!("{}: {}", err.error, description)
                    }
                    _ => err.error,
                },
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            tracing::warn!(
                status = status.as_u16(),
                message = %message,
                "Token endpoint rejected exchange"
            );
            return Err(ConnectError::token_exchange(message));
        }

        let tokens: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            ConnectError::token_exchange(format!(
                "malformed token response (line {}, column {})",
                e.line(),
                e.column()
            ))
        })?;

        tracing::debug!(
            token_type = %tokens.token_type,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Token exchange succeeded"
        );

        Ok(tokens)
    }
}

/// `client_secret_basic` header value, form-encoding both parts first.
fn basic_credentials(client_id: &str, client_secret: &str) -> String {
    let id: String = byte_serialize(client_id.as_bytes()).collect();
    let secret: String = byte_serialize(client_secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
}

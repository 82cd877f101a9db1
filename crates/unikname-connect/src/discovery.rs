//! OpenID Connect discovery client and document cache.
//!
//! # Overview
//!
//! - [`DiscoveryClient`] fetches and validates a discovery document
//! - [`DiscoveryCache`] serves documents through a [`CacheService`], keyed by
//!   the discovery URL, for the configured TTL (10 minutes by default)
//!
//! Concurrent logins that hit a cold or expired entry share a single upstream
//! fetch when the cache service is single-flight, as [`MokaCacheService`] is.
//!
//! # Security Considerations
//!
//! - Only HTTPS URLs are accepted (configurable for testing)
//! - Requests are bounded by a timeout and a response size limit
//! - Only connect and timeout failures are retried, once by default
//!
//! [`MokaCacheService`]: crate::cache::MokaCacheService

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::cache::CacheService;
use crate::config::EngineConfig;
use crate::oidc::OidcDiscoveryDocument;
use crate::transport::{ReadError, read_limited, send_with_retry};

/// Shared cache type for discovery documents.
pub type DiscoveryCacheService = dyn CacheService<Arc<OidcDiscoveryDocument>, DiscoveryError>;

/// Errors that can occur during OIDC discovery.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The document could not be parsed.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// A URL uses a scheme other than HTTPS.
    #[error("Invalid URL scheme for {0}: only HTTPS is allowed")]
    InvalidScheme(String),

    /// An endpoint in the document is empty or not a URL.
    #[error("Invalid endpoint {field}: {value}")]
    InvalidEndpoint {
        /// Document field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The provider does not offer the authorization code flow with PKCE.
    #[error("Provider does not support {0}")]
    Unsupported(&'static str),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

impl DiscoveryError {
    fn from_transport(url: &Url, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

/// Fetches discovery documents from providers.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http_client: Client,
    max_response_size: usize,
    max_retries: u32,
    allow_http: bool,
}

impl DiscoveryClient {
    /// Creates a client using `http_client` and the engine limits.
    #[must_use]
    pub fn new(http_client: Client, config: &EngineConfig) -> Self {
        Self {
            http_client,
            max_response_size: config.max_response_size,
            max_retries: config.max_retries,
            allow_http: config.allow_http,
        }
    }

    /// Fetches and validates the document at `url`, bypassing any cache.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The URL or an advertised endpoint is not HTTPS (unless `allow_http`)
    /// - The request fails, times out or returns a non-success status
    /// - The body is too large or is not a valid discovery document
    pub async fn fetch(&self, url: &Url) -> Result<OidcDiscoveryDocument, DiscoveryError> {
        validate_scheme(url, self.allow_http)?;

        tracing::debug!(url = %url, "Fetching OIDC discovery document");

        let response = send_with_retry(self.max_retries, url.as_str(), || {
            self.http_client
                .get(url.as_str())
                .header("Accept", "application/json")
        })
        .await
        .map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Failed to fetch OIDC discovery document");
            DiscoveryError::from_transport(url, &e)
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                url = %url,
                status = status.as_u16(),
                "Discovery endpoint returned error status"
            );
            return Err(DiscoveryError::HttpError(status.as_u16()));
        }

        let body = read_limited(response, self.max_response_size)
            .await
            .map_err(|e| match e {
                ReadError::TooLarge => DiscoveryError::ResponseTooLarge {
                    max_size: self.max_response_size,
                },
                ReadError::Transport(e) => DiscoveryError::from_transport(url, &e),
            })?;

        let document: OidcDiscoveryDocument = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Failed to parse OIDC discovery document");
            DiscoveryError::ParseError(e.to_string())
        })?;

        self.validate_document(&document)?;

        tracing::debug!(issuer = %document.issuer, "Discovered OIDC configuration");

        Ok(document)
    }

    fn validate_document(&self, document: &OidcDiscoveryDocument) -> Result<(), DiscoveryError> {
        for (field, value) in [
            ("issuer", &document.issuer),
            ("authorization_endpoint", &document.authorization_endpoint),
            ("token_endpoint", &document.token_endpoint),
            ("jwks_uri", &document.jwks_uri),
        ] {
            let url = Url::parse(value).map_err(|_| DiscoveryError::InvalidEndpoint {
                field,
                value: value.clone(),
            })?;
            validate_scheme(&url, self.allow_http)?;
        }

        if !document.supports_response_type("code") {
            return Err(DiscoveryError::Unsupported("response_type code"));
        }
        if !document.supports_pkce_method("S256") {
            return Err(DiscoveryError::Unsupported("PKCE S256"));
        }
        Ok(())
    }
}

fn validate_scheme(url: &Url, allow_http: bool) -> Result<(), DiscoveryError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(DiscoveryError::InvalidScheme(url.to_string())),
    }
}

/// Discovery documents served through a [`CacheService`].
#[derive(Clone)]
pub struct DiscoveryCache {
    client: DiscoveryClient,
    cache: Arc<DiscoveryCacheService>,
    ttl: Duration,
}

impl DiscoveryCache {
    /// Creates a cache that stores documents for `ttl`.
    #[must_use]
    pub fn new(client: DiscoveryClient, cache: Arc<DiscoveryCacheService>, ttl: Duration) -> Self {
        Self { client, cache, ttl }
    }

    /// Returns the discovery document for `url`, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; failures are not cached.
    pub async fn fetch(&self, url: &Url) -> Result<Arc<OidcDiscoveryDocument>, DiscoveryError> {
        let client = self.client.clone();
        let target = url.clone();
        let producer = Box::pin(async move { client.fetch(&target).await.map(Arc::new) });

        self.cache
            .fetch(&cache_key(url), self.ttl, producer)
            .await
    }

    /// Drops the cached document for `url`.
    pub async fn invalidate(&self, url: &Url) {
        self.cache.invalidate(&cache_key(url)).await;
        tracing::debug!(url = %url, "Invalidated discovery cache entry");
    }
}

/// Normalizes a discovery URL for use as a cache key.
fn cache_key(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCacheService;
    use crate::transport::build_http_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> EngineConfig {
        EngineConfig::default().with_allow_http(true)
    }

    fn client(config: &EngineConfig) -> DiscoveryClient {
        DiscoveryClient::new(build_http_client(config).unwrap(), config)
    }

    fn document_json(base: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": base,
            "authorization_endpoint": format!("{base}/authorize"),
            "token_endpoint": format!("{base}/token"),
            "jwks_uri": format!("{base}/jwks"),
            "response_types_supported": ["code"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })
    }

    #[test]
    fn test_cache_key() {
        let a = Url::parse("https://id.example.com/.well-known/openid-configuration/").unwrap();
        let b = Url::parse("https://id.example.com/.well-known/openid-configuration").unwrap();
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn test_validate_scheme() {
        let https = Url::parse("https://id.example.com").unwrap();
        let http = Url::parse("http://id.example.com").unwrap();
        let ftp = Url::parse("ftp://id.example.com").unwrap();

        assert!(validate_scheme(&https, false).is_ok());
        assert!(validate_scheme(&http, false).is_err());
        assert!(validate_scheme(&http, true).is_ok());
        assert!(validate_scheme(&ftp, true).is_err());
    }

    #[tokio::test]
    async fn test_fetch_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_json(&server.uri())))
            .mount(&server)
            .await;

        let url =
            Url::parse(&format!("{}/.well-known/openid-configuration", server.uri())).unwrap();
        let doc = client(&test_config()).fetch(&url).await.unwrap();

        assert_eq!(doc.issuer, server.uri());
        assert_eq!(doc.token_endpoint, format!("{}/token", server.uri()));
    }

    #[tokio::test]
    async fn test_http_rejected_by_default() {
        let url = Url::parse("http://id.example.com/.well-known/openid-configuration").unwrap();
        let err = client(&EngineConfig::default()).fetch(&url).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidScheme(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = client(&test_config()).fetch(&url).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::HttpError(503)));
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = client(&test_config()).fetch(&url).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let server = MockServer::start().await;
        let mut doc = document_json(&server.uri());
        doc["token_endpoint"] = serde_json::json!("not a url");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = client(&test_config()).fetch(&url).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::InvalidEndpoint {
                field: "token_endpoint",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_provider_without_code_flow_or_s256() {
        let server = MockServer::start().await;
        let mut implicit_only = document_json(&server.uri());
        implicit_only["response_types_supported"] = serde_json::json!(["id_token"]);
        let mut plain_pkce = document_json(&server.uri());
        plain_pkce["code_challenge_methods_supported"] = serde_json::json!(["plain"]);
        Mock::given(method("GET"))
            .and(path("/implicit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(implicit_only))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(plain_pkce))
            .mount(&server)
            .await;

        let client = client(&test_config());
        let url = Url::parse(&format!("{}/implicit", server.uri())).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unsupported("response_type code")));

        let url = Url::parse(&format!("{}/plain", server.uri())).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unsupported("PKCE S256")));
    }

    #[tokio::test]
    async fn test_cached_document_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_json(&server.uri())))
            .expect(2)
            .mount(&server)
            .await;

        let config = test_config();
        let cache = DiscoveryCache::new(
            client(&config),
            Arc::new(MokaCacheService::<Arc<OidcDiscoveryDocument>>::new(8)),
            config.discovery_ttl,
        );
        let url = Url::parse(&server.uri()).unwrap();

        let first = cache.fetch(&url).await.unwrap();
        let second = cache.fetch(&url).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.invalidate(&url).await;
        cache.fetch(&url).await.unwrap();
    }

    #[test]
    fn test_discovery_error_display() {
        assert_eq!(
            DiscoveryError::HttpError(404).to_string(),
            "HTTP error: status 404"
        );
        assert_eq!(
            DiscoveryError::ResponseTooLarge { max_size: 1024 }.to_string(),
            "Response exceeds maximum size of 1024 bytes"
        );
    }
}

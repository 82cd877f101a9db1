//! Provider JWKS fetching and caching.
//!
//! ID tokens are verified against the provider's published key set. Key sets
//! are cached per `jwks_uri` for the provider's `Cache-Control: max-age`,
//! clamped between the configured bounds.
//!
//! When a token names a `kid` that is not in the cached set, the set is
//! fetched again once, so rotated keys are picked up without waiting for the
//! cache to expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::config::EngineConfig;
use crate::transport::{ReadError, read_limited, send_with_retry};

/// A verification key and the algorithm it is pinned to, if any.
pub type VerificationKey = (DecodingKey, Option<Algorithm>);

/// Key set failures.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Transport failure or timeout.
    #[error("key set request failed: {0}")]
    Fetch(String),

    /// Non-success status from the key set endpoint.
    #[error("key set endpoint returned status {0}")]
    Status(u16),

    /// Body is not a JWK set.
    #[error("malformed key set: {0}")]
    Malformed(String),

    /// No key with this `kid`, even after a refresh.
    #[error("no key with kid '{0}' in provider key set")]
    UnknownKid(String),

    /// The set holds no key usable for signatures.
    #[error("provider key set has no signing keys")]
    NoSigningKeys,

    /// A JWK could not be turned into a verification key.
    #[error("unusable key: {0}")]
    UnusableKey(String),

    /// `jwks_uri` is not HTTPS.
    #[error("key set URL must use https: {0}")]
    InsecureUri(String),

    /// Body larger than the configured limit.
    #[error("key set larger than {max_size} bytes")]
    TooLarge {
        /// Configured limit.
        max_size: usize,
    },
}

struct CachedKeySet {
    jwks: JwkSet,
    expires_at: Instant,
}

/// TTL bounds and limits for [`ProviderJwksCache`].
#[derive(Debug, Clone)]
struct JwksLimits {
    default_ttl: Duration,
    min_ttl: Duration,
    max_ttl: Duration,
    max_response_size: usize,
    max_retries: u32,
    allow_http: bool,
}

/// In-memory cache for provider key sets.
pub struct ProviderJwksCache {
    http_client: Client,
    cache: Arc<RwLock<HashMap<String, CachedKeySet>>>,
    refresh_lock: Mutex<()>,
    limits: JwksLimits,
}

impl ProviderJwksCache {
    /// Creates a key set cache using `http_client` and the engine limits.
    #[must_use]
    pub fn new(http_client: Client, config: &EngineConfig) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            refresh_lock: Mutex::new(()),
            limits: JwksLimits {
                default_ttl: config.jwks_default_ttl,
                min_ttl: config.jwks_min_ttl,
                max_ttl: config.jwks_max_ttl,
                max_response_size: config.max_response_size,
                max_retries: config.max_retries,
                allow_http: config.allow_http,
            },
        }
    }

    /// Gets the verification key with ID `kid`.
    ///
    /// On a miss (no fresh set cached, or `kid` absent from it) the set is
    /// fetched once and searched again.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS cannot be fetched, or if the key is still
    /// missing or unusable after the refresh.
    pub async fn get_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<VerificationKey, JwksError> {
        if let Some(result) = self.lookup_cached(jwks_uri, kid).await {
            tracing::trace!(kid = %kid, url = %jwks_uri, "JWKS cache hit");
            return result;
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited.
        if let Some(result) = self.lookup_cached(jwks_uri, kid).await {
            return result;
        }

        tracing::debug!(kid = %kid, url = %jwks_uri, "JWKS cache miss, refreshing key set");
        self.refresh(jwks_uri).await?;

        self.lookup_cached(jwks_uri, kid)
            .await
            .unwrap_or_else(|| Err(JwksError::UnknownKid(kid.to_string())))
    }

    /// Looks up `kid` in a fresh cached set without fetching.
    async fn lookup_cached(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Option<Result<VerificationKey, JwksError>> {
        let cache = self.cache.read().await;
        let cached = cache.get(&cache_key(jwks_uri))?;
        if Instant::now() >= cached.expires_at {
            return None;
        }

        let jwk = cached
            .jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))?;
        Some(to_verification_key(jwk))
    }

    /// Gets all signing keys, for tokens without a `kid` header.
    ///
    /// Keys with `use: "enc"` and keys that cannot be decoded are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS cannot be fetched or holds no signing key.
    pub async fn find_signing_keys(
        &self,
        jwks_uri: &Url,
    ) -> Result<Vec<VerificationKey>, JwksError> {
        self.ensure_fresh(jwks_uri).await?;

        let cache = self.cache.read().await;
        let cached = cache
            .get(&cache_key(jwks_uri))
            .ok_or_else(|| JwksError::Fetch("key set missing after refresh".to_string()))?;

        let keys: Vec<_> = cached
            .jwks
            .keys
            .iter()
            .filter(|k| !matches!(&k.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| to_verification_key(jwk).ok())
            .collect();

        if keys.is_empty() {
            Err(JwksError::NoSigningKeys)
        } else {
            tracing::debug!(count = keys.len(), url = %jwks_uri, "Found signing keys");
            Ok(keys)
        }
    }

    async fn ensure_fresh(&self, jwks_uri: &Url) -> Result<(), JwksError> {
        let key = cache_key(jwks_uri);
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key)
                && Instant::now() < cached.expires_at
            {
                return Ok(());
            }
        }

        self.refresh(jwks_uri).await
    }

    /// Fetches the JWKS and replaces the cached set.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The URI scheme is not HTTPS (unless `allow_http` is configured)
    /// - The HTTP request fails or returns a non-success status
    /// - The response is too large or is not a JWKS
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<(), JwksError> {
        self.validate_scheme(jwks_uri)?;

        tracing::debug!(url = %jwks_uri, "Fetching JWKS");

        let response = send_with_retry(self.limits.max_retries, jwks_uri.as_str(), || {
            self.http_client
                .get(jwks_uri.as_str())
                .header("Accept", "application/json")
        })
        .await
        .map_err(|e| {
            tracing::warn!(url = %jwks_uri, error = %e, "Failed to fetch JWKS");
            JwksError::Fetch(e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(JwksError::Status(response.status().as_u16()));
        }

        let ttl = self.parse_cache_control(response.headers());

        let body = read_limited(response, self.limits.max_response_size)
            .await
            .map_err(|e| match e {
                ReadError::TooLarge => JwksError::TooLarge {
                    max_size: self.limits.max_response_size,
                },
                ReadError::Transport(e) => JwksError::Fetch(e.to_string()),
            })?;

        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(url = %jwks_uri, error = %e, "Failed to parse JWKS");
            JwksError::Malformed(e.to_string())
        })?;

        tracing::debug!(
            url = %jwks_uri,
            keys = jwks.keys.len(),
            ttl = ?ttl,
            "Cached JWKS"
        );

        let mut cache = self.cache.write().await;
        cache.insert(
            cache_key(jwks_uri),
            CachedKeySet {
                jwks,
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(())
    }

    fn validate_scheme(&self, uri: &Url) -> Result<(), JwksError> {
        match uri.scheme() {
            "https" => Ok(()),
            "http" if self.limits.allow_http => Ok(()),
            _ => Err(JwksError::InsecureUri(uri.to_string())),
        }
    }

    /// Extracts `max-age` and clamps it between the TTL bounds.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|secs| secs.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.limits.default_ttl);

        ttl.min(self.limits.max_ttl).max(self.limits.min_ttl)
    }

    /// Drops the cached set for `jwks_uri`.
    pub async fn invalidate(&self, jwks_uri: &Url) {
        self.cache.write().await.remove(&cache_key(jwks_uri));
        tracing::debug!(url = %jwks_uri, "Invalidated JWKS cache");
    }

    /// Clears all expired entries.
    pub async fn cleanup(&self) {
        let mut cache = self.cache.write().await;
        let now = Instant::now();
        let before = cache.len();
        cache.retain(|_, v| v.expires_at > now);

        let removed = before - cache.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired JWKS cache entries");
        }
    }

    /// Returns the number of cached key sets.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Returns `true` if no key set is cached.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

fn to_verification_key(jwk: &Jwk) -> Result<VerificationKey, JwksError> {
    DecodingKey::from_jwk(jwk)
        .map(|key| (key, jwk_algorithm(jwk)))
        .map_err(|e| JwksError::UnusableKey(e.to_string()))
}

fn cache_key(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

/// Maps the JWK `alg` member to a signature algorithm.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

//! ID token validation.
//!
//! Checks run in a fixed order and each has its own error:
//!
//! 1. structure: three base64url segments, JSON header and claims (`MalformedToken`)
//! 2. signature against the provider key set (`SignatureInvalid`)
//! 3. `iss` equals the discovery issuer (`IssuerMismatch`)
//! 4. `aud` contains our client ID (`AudienceMismatch`)
//! 5. `exp` and `iat` within the clock-skew window (`TokenExpired`)
//! 6. `nonce` equals the one sent with the authorization request (`NonceMismatch`)
//!
//! None of these are retried; authorization codes are single-use.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use crate::ConnectResult;
use crate::config::ProviderConfig;
use crate::error::ConnectError;
use crate::jwks::{ProviderJwksCache, VerificationKey};
use crate::oidc::OidcDiscoveryDocument;

/// Standard OIDC ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer identifier.
    pub iss: String,

    /// Subject identifier.
    pub sub: String,

    /// Audience (string or array).
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at time (Unix timestamp).
    pub iat: i64,

    /// Nonce value.
    pub nonce: Option<String>,

    /// Authorized party.
    pub azp: Option<String>,

    /// User's email address.
    pub email: Option<String>,

    /// User's full name.
    pub name: Option<String>,

    /// User's preferred username.
    pub preferred_username: Option<String>,

    /// Extra claims not defined in the struct.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Custom deserializer for audience which can be a string or array.
fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

/// Verified identity extracted from an ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityClaims {
    /// Provider subject identifier.
    pub subject: String,
    /// Email address, if released.
    pub email: Option<String>,
    /// Resolved `email_verified`; `true` when the claim is absent.
    pub email_verified: bool,
    /// Display name.
    pub name: Option<String>,
    /// Preferred username.
    pub username: Option<String>,
    /// Every claim of the token.
    pub raw: Map<String, Value>,
}

/// Resolves the `email_verified` claim.
///
/// Absent (or `null`) means verified. Booleans are taken as-is. The strings
/// `"true"` and `"false"` are accepted case-insensitively; any other value is
/// treated as unverified.
#[must_use]
pub fn resolve_email_verified(claim: Option<&Value>) -> bool {
    match claim {
        None | Some(Value::Null) => true,
        Some(Value::Bool(verified)) => *verified,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(_) => false,
    }
}

/// Validates ID tokens against provider metadata and keys.
pub struct IdTokenValidator {
    jwks: Arc<ProviderJwksCache>,
    clock_skew_secs: i64,
}

impl IdTokenValidator {
    /// Creates a validator with the given clock-skew tolerance in seconds.
    #[must_use]
    pub fn new(jwks: Arc<ProviderJwksCache>, clock_skew_secs: i64) -> Self {
        Self {
            jwks,
            clock_skew_secs,
        }
    }

    /// Validates `id_token` and extracts the identity claims.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing check, see the module docs.
    /// A key set that cannot be fetched yields `DiscoveryUnavailable`.
    pub async fn validate(
        &self,
        id_token: &str,
        discovery: &OidcDiscoveryDocument,
        config: &ProviderConfig,
        expected_nonce: &str,
    ) -> ConnectResult<IdentityClaims> {
        // 1. Structure
        let (header, raw) = parse_unverified(id_token)?;
        let claims: IdTokenClaims = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| ConnectError::MalformedToken(format!("invalid claims: {e}")))?;

        // 2. Signature
        self.verify_signature(id_token, &header, discovery).await?;

        // 3. Issuer
        if claims.iss != discovery.issuer {
            return Err(ConnectError::issuer_mismatch(&discovery.issuer, &claims.iss));
        }

        // 4. Audience
        if !claims.aud.iter().any(|aud| *aud == config.client_id) {
            return Err(ConnectError::AudienceMismatch);
        }
        if claims.aud.len() > 1
            && let Some(azp) = &claims.azp
            && *azp != config.client_id
        {
            return Err(ConnectError::AudienceMismatch);
        }

        // 5. Time window
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.check_time_window(&claims, now)?;

        // 6. Nonce
        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(ConnectError::NonceMismatch);
        }

        tracing::debug!(
            issuer = %claims.iss,
            "Validated ID token"
        );

        Ok(IdentityClaims {
            email_verified: resolve_email_verified(raw.get("email_verified")),
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
            username: claims.preferred_username,
            raw,
        })
    }

    async fn verify_signature(
        &self,
        id_token: &str,
        header: &Header,
        discovery: &OidcDiscoveryDocument,
    ) -> ConnectResult<()> {
        let jwks_uri = Url::parse(&discovery.jwks_uri)
            .map_err(|e| ConnectError::DiscoveryUnavailable(format!("invalid jwks_uri: {e}")))?;

        match &header.kid {
            Some(kid) => {
                let key = self.jwks.get_key(&jwks_uri, kid).await?;
                verify_with_key(id_token, header.alg, &key)
            }
            None => {
                let keys = self.jwks.find_signing_keys(&jwks_uri).await?;
                let mut last_error = ConnectError::SignatureInvalid("no usable key".to_string());
                for key in &keys {
                    match verify_with_key(id_token, header.alg, key) {
                        Ok(()) => return Ok(()),
                        Err(e) => last_error = e,
                    }
                }
                Err(last_error)
            }
        }
    }

    fn check_time_window(&self, claims: &IdTokenClaims, now: i64) -> ConnectResult<()> {
        if now > claims.exp.saturating_add(self.clock_skew_secs) {
            return Err(ConnectError::TokenExpired(format!(
                "expired at {}, now {}",
                claims.exp, now
            )));
        }
        if claims.iat > now.saturating_add(self.clock_skew_secs) {
            return Err(ConnectError::TokenExpired(format!(
                "issued in the future at {}, now {}",
                claims.iat, now
            )));
        }
        Ok(())
    }
}

/// Decodes header and claims without checking the signature.
fn parse_unverified(id_token: &str) -> ConnectResult<(Header, Map<String, Value>)> {
    let segments: Vec<&str> = id_token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(ConnectError::MalformedToken(
            "expected three non-empty segments".to_string(),
        ));
    }

    let header = decode_header(id_token)
        .map_err(|e| ConnectError::MalformedToken(format!("invalid header: {e}")))?;

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| ConnectError::MalformedToken(format!("invalid payload encoding: {e}")))?;
    let claims = match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(ConnectError::MalformedToken(
                "claims are not a JSON object".to_string(),
            ));
        }
        Err(e) => {
            return Err(ConnectError::MalformedToken(format!("invalid claims JSON: {e}")));
        }
    };

    Ok((header, claims))
}

/// Verifies only the signature; claim checks happen separately.
fn verify_with_key(
    id_token: &str,
    header_alg: Algorithm,
    key: &VerificationKey,
) -> ConnectResult<()> {
    let (decoding_key, key_alg): (&DecodingKey, Option<Algorithm>) = (&key.0, key.1);

    if let Some(key_alg) = key_alg
        && key_alg != header_alg
    {
        return Err(ConnectError::SignatureInvalid(format!(
            "token algorithm {header_alg:?} does not match key algorithm {key_alg:?}"
        )));
    }

    let mut validation = Validation::new(header_alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Value>(id_token, decoding_key, &validation)
        .map(|_| ())
        .map_err(|e| match e.kind() {
            ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                ConnectError::MalformedToken(e.to_string())
            }
            _ => ConnectError::SignatureInvalid(e.to_string()),
        })
}

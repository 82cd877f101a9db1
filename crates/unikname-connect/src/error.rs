//! Error types for the Unikname Connect login flow.
//!
//! Every failure of a login attempt is expressed as a [`ConnectError`]. The
//! `Display` output carries full detail and is meant for server-side
//! diagnostics only; end users only ever see [`ConnectError::public_message`].

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::jwks::JwksError;

/// Errors that can occur during a Unikname Connect login attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// The provider is disabled in the host settings.
    #[error("Identity provider is disabled: {0}")]
    ProviderDisabled(String),

    /// The provider settings are incomplete or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The discovery document or key set could not be fetched or parsed.
    #[error("Discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// The requested redirect URI is not registered for this client.
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// The callback `state` is unknown, was already used, or has expired.
    #[error("Unknown, reused or expired login state")]
    StateMismatch,

    /// The provider redirected back with an OAuth error.
    #[error("OAuth error from provider: {error} - {description}")]
    ProviderError {
        /// The OAuth error code.
        error: String,
        /// The error description, empty when absent.
        description: String,
    },

    /// The token endpoint rejected the exchange or answered garbage.
    #[error("Token exchange failed: {provider_message}")]
    TokenExchangeFailed {
        /// Message reported by the provider, or the transport failure.
        provider_message: String,
    },

    /// The ID token is not a well-formed signed JWT.
    #[error("Malformed ID token: {0}")]
    MalformedToken(String),

    /// The ID token signature does not verify against the provider keys.
    #[error("Invalid ID token signature: {0}")]
    SignatureInvalid(String),

    /// The ID token issuer is not the discovery document issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Issuer from the discovery document.
        expected: String,
        /// Issuer from the ID token.
        actual: String,
    },

    /// The ID token audience does not include our client ID.
    #[error("Audience mismatch: ID token audience does not include our client ID")]
    AudienceMismatch,

    /// `exp` or `iat` falls outside the clock-skew window.
    #[error("ID token time validation failed: {0}")]
    TokenExpired(String),

    /// The ID token nonce is missing or differs from the one we sent.
    #[error("Nonce mismatch: ID token nonce does not match expected nonce")]
    NonceMismatch,
}

impl ConnectError {
    /// Creates an `IssuerMismatch` error.
    #[must_use]
    pub fn issuer_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssuerMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a `ProviderError` from callback parameters.
    #[must_use]
    pub fn provider_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::ProviderError {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a `TokenExchangeFailed` error.
    #[must_use]
    pub fn token_exchange(provider_message: impl Into<String>) -> Self {
        Self::TokenExchangeFailed {
            provider_message: provider_message.into(),
        }
    }

    /// Returns `true` if this is an ID token validation error.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::SignatureInvalid(_)
                | Self::IssuerMismatch { .. }
                | Self::AudienceMismatch
                | Self::TokenExpired(_)
                | Self::NonceMismatch
        )
    }

    /// Returns `true` if the failure originates from the provider or the network.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryUnavailable(_)
                | Self::ProviderError { .. }
                | Self::TokenExchangeFailed { .. }
        )
    }

    /// Stable snake_case code for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderDisabled(_) => "provider_disabled",
            Self::Configuration(_) => "configuration",
            Self::DiscoveryUnavailable(_) => "discovery_unavailable",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::StateMismatch => "state_mismatch",
            Self::ProviderError { .. } => "provider_error",
            Self::TokenExchangeFailed { .. } => "token_exchange_failed",
            Self::MalformedToken(_) => "malformed_token",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::TokenExpired(_) => "token_expired",
            Self::NonceMismatch => "nonce_mismatch",
        }
    }

    /// Message that is safe to show to the end user.
    ///
    /// Never includes provider responses, token contents or configuration values.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::ProviderDisabled(_) => "This login method is not enabled.",
            Self::Configuration(_) | Self::InvalidRedirectUri(_) => {
                "This login method is not configured correctly. Please contact the site administrator."
            }
            Self::DiscoveryUnavailable(_) => {
                "The login provider is currently unavailable. Please try again later."
            }
            Self::StateMismatch => "Your login session has expired. Please try again.",
            _ => "Sorry, there was an error authorizing your account. Please try again.",
        }
    }
}

impl From<DiscoveryError> for ConnectError {
    fn from(err: DiscoveryError) -> Self {
        Self::DiscoveryUnavailable(err.to_string())
    }
}

impl From<JwksError> for ConnectError {
    fn from(err: JwksError) -> Self {
        match err {
            JwksError::UnknownKid(_) | JwksError::NoSigningKeys | JwksError::UnusableKey(_) => {
                Self::SignatureInvalid(err.to_string())
            }
            _ => Self::DiscoveryUnavailable(format!("JWKS: {err}")),
        }
    }
}

impl From<ConfigError> for ConnectError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

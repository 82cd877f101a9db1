//! # unikname-connect
//!
//! OpenID Connect relying-party engine for the Unikname Connect identity
//! provider.
//!
//! This crate provides:
//! - Discovery document fetching with a shared, single-flight cache
//! - Authorization requests with state, nonce, PKCE and an allow-list of
//!   passthrough parameters
//! - Authorization code exchange at the provider token endpoint
//! - ID token validation (signature, issuer, audience, time window, nonce)
//! - Identity mapping policy for linking and email handling
//! - Configurable error redirects and gated protocol diagnostics
//! - The host plugin hooks ([`Authenticator`])
//!
//! ## Modules
//!
//! - [`config`] - Provider settings, engine tunables and settings sources
//! - [`discovery`] - Discovery client and cache
//! - [`authorize`] - Authorization request builder
//! - [`token`] - Token exchange client
//! - [`validator`] - ID token validator
//! - [`policy`] - Identity mapping policy
//! - [`router`] - Error redirect rules
//! - [`diagnostics`] - Verbose diagnostics logger
//! - [`engine`] - Login flow orchestration
//! - [`authenticator`] - Host plugin surface

pub mod authenticator;
pub mod authorize;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod jwks;
pub mod observability;
pub mod oidc;
pub mod pending;
pub mod pkce;
pub mod policy;
pub mod router;
pub mod token;
pub mod transport;
pub mod validator;

#[cfg(test)]
mod test_support;

/// Stable provider identifier.
pub const PROVIDER_NAME: &str = "unikname";

pub use authenticator::{
    Authenticator, LoginStrategy, MiddlewareRegistry, OidcStrategy, UniknameAuthenticator,
};
pub use authorize::AuthorizationRequest;
pub use cache::{CacheService, MokaCacheService};
pub use config::{
    ConfigError, ConnectSettings, EngineConfig, ProviderConfig, ProviderSettings, SettingsSource,
    StaticSettings,
};
pub use diagnostics::{DiagnosticsLogger, LogError, Logger, TracingLogger};
pub use discovery::{DiscoveryCache, DiscoveryClient, DiscoveryError};
pub use engine::{CallbackParams, LoginFailure, LoginRedirect, OidcEngine, OidcEngineBuilder};
pub use error::ConnectError;
pub use jwks::{JwksError, ProviderJwksCache};
pub use oidc::OidcDiscoveryDocument;
pub use pending::{MemoryPendingLoginStore, PendingLogin, PendingLoginStore};
pub use policy::{AccountLink, ExistingAccount, IdentityResolution, LinkAction};
pub use router::{ErrorRedirectRule, ErrorRouter, SubstringErrorRouter};
pub use token::{TokenExchangeClient, TokenResponse};
pub use validator::{IdTokenValidator, IdentityClaims};

/// Result type for login operations.
pub type ConnectResult<T> = Result<T, ConnectError>;

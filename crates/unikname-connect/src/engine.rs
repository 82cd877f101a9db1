//! Login flow orchestration.
//!
//! [`OidcEngine`] owns the long-lived collaborators (HTTP client, discovery
//! and key caches, pending login store, logger, error router) and drives one
//! login attempt at a time through two entry points:
//!
//! 1. [`OidcEngine::start_login`] builds the authorization request and
//!    remembers its state.
//! 2. [`OidcEngine::handle_callback`] consumes that state, exchanges the code,
//!    validates the ID token and resolves the identity.
//!
//! Every failure is logged, routed through the [`ErrorRouter`] and returned as
//! a [`LoginFailure`] that carries only a generic message for the end user.

use std::sync::Arc;

use url::Url;

use crate::authorize::AuthorizationRequest;
use crate::cache::MokaCacheService;
use crate::config::{EngineConfig, ProviderConfig};
use crate::diagnostics::{DiagnosticsLogger, Logger, TracingLogger};
use crate::discovery::{DiscoveryCache, DiscoveryCacheService, DiscoveryClient};
use crate::error::ConnectError;
use crate::jwks::ProviderJwksCache;
use crate::oidc::OidcDiscoveryDocument;
use crate::pending::{MemoryPendingLoginStore, PendingLogin, PendingLoginStore};
use crate::policy::{self, ExistingAccount, IdentityResolution};
use crate::router::{ErrorRouter, SubstringErrorRouter};
use crate::token::TokenExchangeClient;
use crate::transport::build_http_client;
use crate::validator::IdTokenValidator;
use crate::{ConnectResult, PROVIDER_NAME};

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider authorization URL.
    pub authorization_url: Url,
    /// State token carried through the round trip.
    pub state: String,
}

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code to exchange.
    pub code: Option<String>,
    /// State token echoed by the provider.
    pub state: Option<String>,
    /// OAuth error code, when the provider refused the login.
    pub error: Option<String>,
    /// Human-readable detail for `error`.
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Collects the callback parameters from query pairs; unknown names are
    /// ignored and the first occurrence of each name wins.
    pub fn from_query<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();
        for (name, value) in pairs {
            let slot = match name {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        params
    }
}

/// A failed login attempt, ready to be surfaced to the host.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct LoginFailure {
    /// Full error, for server-side handling only.
    pub error: ConnectError,
    /// Destination chosen by the error router, if a rule matched.
    pub redirect: Option<String>,
    /// Text that is safe to show to the end user.
    pub public_message: &'static str,
}

impl LoginFailure {
    /// Wraps an error raised before a provider configuration exists, so no
    /// redirect rules apply.
    #[must_use]
    pub fn unrouted(error: ConnectError) -> Self {
        tracing::warn!(
            provider = PROVIDER_NAME,
            kind = error.kind(),
            error = %error,
            "Login attempt failed"
        );
        Self {
            public_message: error.public_message(),
            error,
            redirect: None,
        }
    }
}

/// OIDC relying-party engine.
pub struct OidcEngine {
    config: EngineConfig,
    discovery: DiscoveryCache,
    jwks: Arc<ProviderJwksCache>,
    validator: IdTokenValidator,
    token_client: TokenExchangeClient,
    pending: Arc<dyn PendingLoginStore>,
    logger: Arc<dyn Logger>,
    error_router: Arc<dyn ErrorRouter>,
}

impl OidcEngine {
    /// Creates an engine with the default in-process collaborators.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn new(config: EngineConfig) -> ConnectResult<Self> {
        Self::builder(config).build()
    }

    /// Returns a builder for injecting host services.
    #[must_use]
    pub fn builder(config: EngineConfig) -> OidcEngineBuilder {
        OidcEngineBuilder {
            config,
            discovery_cache: None,
            pending: None,
            logger: None,
            error_router: None,
        }
    }

    /// Engine tunables.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a login: builds the authorization request and stores its state.
    ///
    /// `inbound_params` are the query parameters of the host login request;
    /// only allow-listed names are forwarded to the provider.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginFailure`] wrapping `ProviderDisabled`,
    /// `DiscoveryUnavailable` or `InvalidRedirectUri`.
    pub async fn start_login<'a, I>(
        &self,
        config: &ProviderConfig,
        redirect_uri: &str,
        inbound_params: I,
    ) -> Result<LoginRedirect, LoginFailure>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let diagnostics = self.diagnostics(config);
        self.try_start_login(config, &diagnostics, redirect_uri, inbound_params)
            .await
            .map_err(|e| self.fail(config, &diagnostics, e))
    }

    /// Completes a login from the provider callback.
    ///
    /// The pending login is consumed before any network call, so a state can
    /// be used once whatever the outcome. `account` is the host account
    /// currently signed in, `None` for an anonymous login.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginFailure`] wrapping the first failing step.
    pub async fn handle_callback(
        &self,
        config: &ProviderConfig,
        params: &CallbackParams,
        account: Option<&ExistingAccount>,
    ) -> Result<IdentityResolution, LoginFailure> {
        let diagnostics = self.diagnostics(config);
        self.try_handle_callback(config, &diagnostics, params, account)
            .await
            .map_err(|e| self.fail(config, &diagnostics, e))
    }

    /// Purges expired pending logins and stale key sets.
    pub async fn cleanup_expired(&self) -> usize {
        let removed = self
            .pending
            .cleanup_expired(self.config.pending_login_ttl)
            .await;
        self.jwks.cleanup().await;
        removed
    }

    async fn try_start_login<'a, I>(
        &self,
        config: &ProviderConfig,
        diagnostics: &DiagnosticsLogger,
        redirect_uri: &str,
        inbound_params: I,
    ) -> ConnectResult<LoginRedirect>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        ensure_enabled(config)?;
        let discovery = self.discovery(config, diagnostics).await?;
        let request =
            AuthorizationRequest::build(config, &discovery, redirect_uri, inbound_params)?;

        self.pending
            .store(
                PendingLogin::from_request(&request),
                self.config.pending_login_ttl,
            )
            .await;
        diagnostics.log(format!(
            "Redirecting to {} with scope '{}' and {} passthrough parameter(s)",
            discovery.authorization_endpoint,
            request.scope,
            request.passthrough.len()
        ));

        Ok(LoginRedirect {
            authorization_url: request.authorization_url,
            state: request.state,
        })
    }

    async fn try_handle_callback(
        &self,
        config: &ProviderConfig,
        diagnostics: &DiagnosticsLogger,
        params: &CallbackParams,
        account: Option<&ExistingAccount>,
    ) -> ConnectResult<IdentityResolution> {
        ensure_enabled(config)?;

        let pending = match params.state.as_deref() {
            Some(state) if !state.is_empty() => {
                self.pending
                    .take(state, self.config.pending_login_ttl)
                    .await
            }
            _ => None,
        };

        if let Some(error) = &params.error {
            return Err(ConnectError::provider_error(
                error,
                params.error_description.as_deref().unwrap_or_default(),
            ));
        }

        let pending = pending.ok_or(ConnectError::StateMismatch)?;

        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                ConnectError::provider_error("invalid_request", "missing authorization code")
            })?;

        let discovery = self.discovery(config, diagnostics).await?;

        diagnostics.log(format!(
            "Exchanging authorization code at {}",
            discovery.token_endpoint
        ));
        let tokens = self
            .token_client
            .exchange(
                config,
                &discovery,
                code,
                &pending.pkce_verifier,
                &pending.redirect_uri,
            )
            .await?;

        diagnostics.log(format!(
            "Token exchange succeeded (token_type '{}'), validating ID token",
            tokens.token_type
        ));
        let claims = self
            .validator
            .validate(&tokens.id_token, &discovery, config, &pending.nonce)
            .await?;

        let resolution = policy::resolve(&claims, config, account);
        diagnostics.log(format!(
            "ID token valid for subject {} (email_verified: {}, link: {:?})",
            resolution.external_id, resolution.email_verified, resolution.link_action
        ));

        Ok(resolution)
    }

    async fn discovery(
        &self,
        config: &ProviderConfig,
        diagnostics: &DiagnosticsLogger,
    ) -> ConnectResult<Arc<OidcDiscoveryDocument>> {
        diagnostics.log(format!(
            "Loading discovery document from {}",
            config.discovery_document_url
        ));
        Ok(self.discovery.fetch(&config.discovery_document_url).await?)
    }

    fn diagnostics(&self, config: &ProviderConfig) -> DiagnosticsLogger {
        DiagnosticsLogger::new(self.logger.clone(), config.verbose_logging)
    }

    fn fail(
        &self,
        config: &ProviderConfig,
        diagnostics: &DiagnosticsLogger,
        error: ConnectError,
    ) -> LoginFailure {
        let message = error.to_string();
        let redirect = self.error_router.route(&message, &config.error_redirects);

        tracing::warn!(
            provider = PROVIDER_NAME,
            kind = error.kind(),
            validation = error.is_validation_error(),
            external = error.is_external_error(),
            redirect = redirect.as_deref().unwrap_or("-"),
            error = %message,
            "Login attempt failed"
        );
        diagnostics.log(format!("Authentication failure: {message}"));

        LoginFailure {
            public_message: error.public_message(),
            error,
            redirect,
        }
    }
}

impl std::fmt::Debug for OidcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn ensure_enabled(config: &ProviderConfig) -> ConnectResult<()> {
    if config.enabled {
        Ok(())
    } else {
        Err(ConnectError::ProviderDisabled(PROVIDER_NAME.to_string()))
    }
}

/// Builder for [`OidcEngine`].
pub struct OidcEngineBuilder {
    config: EngineConfig,
    discovery_cache: Option<Arc<DiscoveryCacheService>>,
    pending: Option<Arc<dyn PendingLoginStore>>,
    logger: Option<Arc<dyn Logger>>,
    error_router: Option<Arc<dyn ErrorRouter>>,
}

impl OidcEngineBuilder {
    /// Uses a host cache for discovery documents.
    #[must_use]
    pub fn discovery_cache(mut self, cache: Arc<DiscoveryCacheService>) -> Self {
        self.discovery_cache = Some(cache);
        self
    }

    /// Uses a host store for pending logins.
    #[must_use]
    pub fn pending_store(mut self, store: Arc<dyn PendingLoginStore>) -> Self {
        self.pending = Some(store);
        self
    }

    /// Uses the host logger for diagnostics.
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Uses a custom error router.
    #[must_use]
    pub fn error_router(mut self, router: Arc<dyn ErrorRouter>) -> Self {
        self.error_router = Some(router);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn build(self) -> ConnectResult<OidcEngine> {
        let config = self.config;
        let http_client = build_http_client(&config)?;

        let discovery_cache: Arc<DiscoveryCacheService> = match self.discovery_cache {
            Some(cache) => cache,
            None => Arc::new(MokaCacheService::<Arc<OidcDiscoveryDocument>>::new(
                config.discovery_cache_capacity,
            )),
        };
        let discovery = DiscoveryCache::new(
            DiscoveryClient::new(http_client.clone(), &config),
            discovery_cache,
            config.discovery_ttl,
        );

        let jwks = Arc::new(ProviderJwksCache::new(http_client.clone(), &config));
        let validator = IdTokenValidator::new(jwks.clone(), config.clock_skew_secs());
        let token_client = TokenExchangeClient::new(http_client, &config);

        let pending: Arc<dyn PendingLoginStore> = match self.pending {
            Some(store) => store,
            None => Arc::new(MemoryPendingLoginStore::new()),
        };
        let logger: Arc<dyn Logger> = match self.logger {
            Some(logger) => logger,
            None => Arc::new(TracingLogger),
        };
        let error_router: Arc<dyn ErrorRouter> = match self.error_router {
            Some(router) => router,
            None => Arc::new(SubstringErrorRouter),
        };

        tracing::debug!(
            request_timeout = ?config.bounded_request_timeout(),
            discovery_ttl = ?config.discovery_ttl,
            "Built OIDC engine"
        );

        Ok(OidcEngine {
            discovery,
            jwks,
            validator,
            token_client,
            pending,
            logger,
            error_router,
            config,
        })
    }
}

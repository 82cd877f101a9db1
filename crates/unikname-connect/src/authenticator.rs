//! Host plugin surface.
//!
//! The host authentication framework talks to a provider through the
//! [`Authenticator`] hooks and drives logins through strategies registered in
//! a [`MiddlewareRegistry`]. Every hook reads the current settings from the
//! [`SettingsSource`], so admin changes apply to the next request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::PROVIDER_NAME;
use crate::config::{ProviderConfig, SettingsSource};
use crate::engine::{CallbackParams, LoginFailure, LoginRedirect, OidcEngine};
use crate::policy::{ExistingAccount, IdentityResolution};
use crate::validator::resolve_email_verified;

/// Hooks the host calls to query a login provider.
pub trait Authenticator: Send + Sync {
    /// Stable provider identifier.
    fn name(&self) -> &str;

    /// Whether the provider is offered on the login page.
    fn enabled(&self) -> bool;

    /// Whether users may disconnect their account from the provider.
    fn can_revoke(&self) -> bool;

    /// Whether the provider may be connected to an existing account.
    fn can_connect_existing_user(&self) -> bool;

    /// Whether the primary email in the host auth payload is verified.
    fn primary_email_verified(&self, auth: &Value) -> bool;

    /// Whether the stored email is replaced on every login.
    fn always_update_user_email(&self) -> bool;

    /// Registers the provider's login strategy.
    fn register_middleware(&self, registry: &mut MiddlewareRegistry);
}

/// The two phases of a redirect-based login.
#[async_trait]
pub trait LoginStrategy: Send + Sync {
    /// Starts a login and returns where to redirect the browser.
    async fn request_phase(
        &self,
        redirect_uri: &str,
        params: &[(String, String)],
    ) -> Result<LoginRedirect, LoginFailure>;

    /// Completes a login from the provider callback.
    async fn callback_phase(
        &self,
        params: &CallbackParams,
        account: Option<&ExistingAccount>,
    ) -> Result<IdentityResolution, LoginFailure>;
}

/// Login strategies keyed by provider name.
#[derive(Default)]
pub struct MiddlewareRegistry {
    strategies: HashMap<String, Arc<dyn LoginStrategy>>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn LoginStrategy>) {
        let name = name.into();
        tracing::debug!(provider = %name, "Registered login strategy");
        self.strategies.insert(name, strategy);
    }

    /// Returns the strategy registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LoginStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

/// OIDC login strategy that snapshots the settings on every request.
pub struct OidcStrategy {
    settings: Arc<dyn SettingsSource>,
    engine: Arc<OidcEngine>,
}

impl OidcStrategy {
    /// Creates a strategy.
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsSource>, engine: Arc<OidcEngine>) -> Self {
        Self { settings, engine }
    }

    fn setup(&self) -> Result<ProviderConfig, LoginFailure> {
        ProviderConfig::from_settings(&self.settings.current())
            .map_err(|e| LoginFailure::unrouted(e.into()))
    }
}

#[async_trait]
impl LoginStrategy for OidcStrategy {
    async fn request_phase(
        &self,
        redirect_uri: &str,
        params: &[(String, String)],
    ) -> Result<LoginRedirect, LoginFailure> {
        let config = self.setup()?;
        self.engine
            .start_login(
                &config,
                redirect_uri,
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )
            .await
    }

    async fn callback_phase(
        &self,
        params: &CallbackParams,
        account: Option<&ExistingAccount>,
    ) -> Result<IdentityResolution, LoginFailure> {
        let config = self.setup()?;
        self.engine
            .handle_callback(&config, params, account)
            .await
    }
}

/// The Unikname Connect provider.
pub struct UniknameAuthenticator {
    settings: Arc<dyn SettingsSource>,
    engine: Arc<OidcEngine>,
}

impl UniknameAuthenticator {
    /// Creates the authenticator.
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsSource>, engine: Arc<OidcEngine>) -> Self {
        Self { settings, engine }
    }
}

impl Authenticator for UniknameAuthenticator {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn enabled(&self) -> bool {
        self.settings.current().enabled
    }

    fn can_revoke(&self) -> bool {
        self.settings.current().allow_association_change
    }

    fn can_connect_existing_user(&self) -> bool {
        self.settings.current().allow_association_change
    }

    fn primary_email_verified(&self, auth: &Value) -> bool {
        resolve_email_verified(auth.pointer("/extra/raw_info/email_verified"))
    }

    fn always_update_user_email(&self) -> bool {
        self.settings.current().overrides_email
    }

    fn register_middleware(&self, registry: &mut MiddlewareRegistry) {
        registry.register(
            PROVIDER_NAME,
            Arc::new(OidcStrategy::new(self.settings.clone(), self.engine.clone())),
        );
    }
}

impl std::fmt::Debug for UniknameAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniknameAuthenticator").finish_non_exhaustive()
    }
}

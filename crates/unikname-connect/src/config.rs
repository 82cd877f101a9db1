//! Provider settings and engine configuration.
//!
//! Two layers of configuration exist:
//!
//! - [`ProviderSettings`] is the raw, host-owned settings record. It is read
//!   through a [`SettingsSource`] at the start of every request phase and
//!   turned into an immutable [`ProviderConfig`] snapshot.
//! - [`EngineConfig`] holds the engine tunables (timeouts, clock skew, cache
//!   lifetimes). It is fixed for the lifetime of an [`OidcEngine`].
//!
//! Both can be loaded from a TOML file layered with environment variables,
//! e.g. `UNIKNAME_CONNECT__PROVIDER__CLIENT_ID=forum`.
//!
//! [`OidcEngine`]: crate::engine::OidcEngine

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::router::{ErrorRedirectRule, parse_rules};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "UNIKNAME_CONNECT";

/// Lower bound for outbound request timeouts.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for outbound request timeouts.
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is empty.
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    /// The discovery document URL does not parse.
    #[error("Invalid discovery document URL: {0}")]
    InvalidDiscoveryUrl(String),

    /// A configured redirect URI does not parse.
    #[error("Invalid redirect URI in settings: {0}")]
    InvalidRedirectUri(String),

    /// The configuration file or environment could not be read.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Raw provider settings as stored by the host.
///
/// Field names match the host settings store. Everything defaults to empty or
/// `false`, so a partially filled store still deserializes.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Whether the provider is offered on the login page.
    pub enabled: bool,

    /// Allows connecting to existing accounts and revoking the link.
    pub allow_association_change: bool,

    /// Overwrite the stored email with the provider email on every login.
    pub overrides_email: bool,

    /// OAuth client identifier.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// URL of the provider discovery document.
    pub discovery_document_url: String,

    /// Space-separated scope sent to the authorization endpoint.
    pub authorize_scope: String,

    /// Scope sent to the token endpoint. Omitted when empty.
    pub token_scope: Option<String>,

    /// Pipe-delimited names of login parameters forwarded to the provider.
    pub authorize_parameters: String,

    /// Newline-delimited `substring|destination` rows.
    pub error_redirects: String,

    /// Emit "OIDC Log: " protocol diagnostics.
    pub verbose_logging: bool,

    /// Callback URLs the host exposes, newline or pipe delimited.
    pub redirect_uris: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_association_change: false,
            overrides_email: false,
            client_id: String::new(),
            client_secret: String::new(),
            discovery_document_url: String::new(),
            authorize_scope: "openid".to_string(),
            token_scope: None,
            authorize_parameters: String::new(),
            error_redirects: String::new(),
            verbose_logging: false,
            redirect_uris: String::new(),
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("enabled", &self.enabled)
            .field("allow_association_change", &self.allow_association_change)
            .field("overrides_email", &self.overrides_email)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("discovery_document_url", &self.discovery_document_url)
            .field("authorize_scope", &self.authorize_scope)
            .field("token_scope", &self.token_scope)
            .field("authorize_parameters", &self.authorize_parameters)
            .field("error_redirects", &self.error_redirects)
            .field("verbose_logging", &self.verbose_logging)
            .field("redirect_uris", &self.redirect_uris)
            .finish()
    }
}

/// Immutable per-request provider configuration.
///
/// Built from [`ProviderSettings`] with [`ProviderConfig::from_settings`].
/// The engine only ever borrows it.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Provider offered on the login page.
    pub enabled: bool,
    /// Connect-to-existing-account and revoke permission.
    pub allow_association_change: bool,
    /// Email overwrite on every login.
    pub overrides_email: bool,
    /// OAuth client identifier.
    pub client_id: String,
    client_secret: String,
    /// Discovery document location.
    pub discovery_document_url: Url,
    /// Scope for the authorization request.
    pub authorize_scope: String,
    /// Scope for the token request, if any.
    pub token_scope: Option<String>,
    /// Inbound parameters that may be forwarded to the provider.
    pub passthrough_parameters: Vec<String>,
    /// Ordered error redirect rules.
    pub error_redirects: Vec<ErrorRedirectRule>,
    /// Verbose protocol diagnostics.
    pub verbose_logging: bool,
    /// Registered callback URLs.
    pub redirect_uris: Vec<Url>,
}

impl ProviderConfig {
    /// Validates raw settings and builds a configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the client credentials or the discovery URL are
    /// missing, or if a URL does not parse.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ConfigError> {
        let client_id = settings.client_id.trim();
        if client_id.is_empty() {
            return Err(ConfigError::MissingSetting("client_id"));
        }
        if settings.client_secret.is_empty() {
            return Err(ConfigError::MissingSetting("client_secret"));
        }

        let discovery_url = settings.discovery_document_url.trim();
        if discovery_url.is_empty() {
            return Err(ConfigError::MissingSetting("discovery_document_url"));
        }
        let discovery_document_url = Url::parse(discovery_url)
            .map_err(|e| ConfigError::InvalidDiscoveryUrl(format!("{discovery_url}: {e}")))?;

        let authorize_scope = match settings.authorize_scope.trim() {
            "" => "openid".to_string(),
            scope => scope.to_string(),
        };

        let token_scope = settings
            .token_scope
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let redirect_uris = split_list(&settings.redirect_uris, &['\n', '|'])
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| ConfigError::InvalidRedirectUri(format!("{raw}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: settings.enabled,
            allow_association_change: settings.allow_association_change,
            overrides_email: settings.overrides_email,
            client_id: client_id.to_string(),
            client_secret: settings.client_secret.clone(),
            discovery_document_url,
            authorize_scope,
            token_scope,
            passthrough_parameters: split_list(&settings.authorize_parameters, &['|'])
                .map(str::to_string)
                .collect(),
            error_redirects: parse_rules(&settings.error_redirects),
            verbose_logging: settings.verbose_logging,
            redirect_uris,
        })
    }

    /// Returns the OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns `true` if `name` may be copied from the login request.
    #[must_use]
    pub fn is_passthrough_allowed(&self, name: &str) -> bool {
        self.passthrough_parameters.iter().any(|p| p == name)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("enabled", &self.enabled)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("discovery_document_url", &self.discovery_document_url.as_str())
            .field("authorize_scope", &self.authorize_scope)
            .field("token_scope", &self.token_scope)
            .field("passthrough_parameters", &self.passthrough_parameters)
            .field("error_redirects", &self.error_redirects.len())
            .field("verbose_logging", &self.verbose_logging)
            .finish_non_exhaustive()
    }
}

fn split_list<'a>(raw: &'a str, delimiters: &'a [char]) -> impl Iterator<Item = &'a str> + 'a {
    raw.split(delimiters)
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Engine tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for discovery, JWKS and token requests.
    /// Bounded to 5-10 seconds, see [`EngineConfig::bounded_request_timeout`].
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Allowed clock skew for `exp` and `iat`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// How long a discovery document stays cached.
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,

    /// How long a started login may wait for its callback.
    #[serde(with = "humantime_serde")]
    pub pending_login_ttl: Duration,

    /// JWKS TTL when the provider sends no Cache-Control.
    #[serde(with = "humantime_serde")]
    pub jwks_default_ttl: Duration,

    /// Lower bound for the JWKS TTL.
    #[serde(with = "humantime_serde")]
    pub jwks_min_ttl: Duration,

    /// Upper bound for the JWKS TTL.
    #[serde(with = "humantime_serde")]
    pub jwks_max_ttl: Duration,

    /// Maximum accepted response size in bytes.
    pub max_response_size: usize,

    /// Retries on connect or timeout failures.
    pub max_retries: u32,

    /// Maximum number of cached discovery documents.
    pub discovery_cache_capacity: u64,

    /// Accept plain HTTP provider URLs. Tests only.
    pub allow_http: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            clock_skew: Duration::from_secs(60),
            discovery_ttl: Duration::from_secs(600), // 10 minutes
            pending_login_ttl: Duration::from_secs(600),
            jwks_default_ttl: Duration::from_secs(3600),
            jwks_min_ttl: Duration::from_secs(300),
            jwks_max_ttl: Duration::from_secs(86400),
            max_response_size: 1024 * 1024, // 1 MB
            max_retries: 1,
            discovery_cache_capacity: 64,
            allow_http: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Sets the discovery document TTL.
    #[must_use]
    pub fn with_discovery_ttl(mut self, ttl: Duration) -> Self {
        self.discovery_ttl = ttl;
        self
    }

    /// Sets the pending login TTL.
    #[must_use]
    pub fn with_pending_login_ttl(mut self, ttl: Duration) -> Self {
        self.pending_login_ttl = ttl;
        self
    }

    /// Allows HTTP (non-HTTPS) provider URLs.
    ///
    /// # Warning
    ///
    /// This should only be used for testing.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Request timeout clamped to 5-10 seconds.
    #[must_use]
    pub fn bounded_request_timeout(&self) -> Duration {
        self.request_timeout.clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT)
    }

    /// Clock skew as whole seconds.
    #[must_use]
    pub fn clock_skew_secs(&self) -> i64 {
        i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Complete configuration file layout.
///
/// ```toml
/// [provider]
/// enabled = true
/// client_id = "forum"
/// discovery_document_url = "https://connect.unikname.com/oidc/.well-known/openid-configuration"
///
/// [engine]
/// request_timeout = "8s"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectSettings {
    /// Provider settings.
    pub provider: ProviderSettings,
    /// Engine tunables.
    pub engine: EngineConfig,
}

impl ConnectSettings {
    /// Loads settings from an optional TOML file and the environment.
    ///
    /// Environment variables override file values, e.g.
    /// `UNIKNAME_CONNECT__ENGINE__REQUEST_TIMEOUT=5s`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the merged values do not
    /// deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        cfg.try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))
    }
}

/// Read access to the host settings store.
///
/// Called once at the start of each request phase, so settings changes apply
/// to the next login without a restart.
pub trait SettingsSource: Send + Sync {
    /// Returns the current settings snapshot.
    fn current(&self) -> Arc<ProviderSettings>;
}

/// In-memory settings source that the host can replace atomically.
#[derive(Clone)]
pub struct StaticSettings {
    inner: Arc<ArcSwap<ProviderSettings>>,
}

impl StaticSettings {
    /// Creates a source holding `settings`.
    #[must_use]
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(settings)),
        }
    }

    /// Replaces the stored settings. Readers holding the old snapshot keep it.
    pub fn update(&self, settings: ProviderSettings) {
        self.inner.store(Arc::new(settings));
        tracing::debug!("Provider settings updated");
    }
}

impl SettingsSource for StaticSettings {
    fn current(&self) -> Arc<ProviderSettings> {
        self.inner.load_full()
    }
}

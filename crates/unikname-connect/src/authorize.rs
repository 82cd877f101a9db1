//! Authorization request construction.
//!
//! Builds the provider redirect for a login attempt: fresh `state`, `nonce`
//! and PKCE verifier, the configured scope, and any inbound login parameters
//! that are on the passthrough allow-list.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use url::Url;

use crate::ConnectResult;
use crate::config::ProviderConfig;
use crate::error::ConnectError;
use crate::oidc::OidcDiscoveryDocument;
use crate::pkce::{CHALLENGE_METHOD_S256, PkceVerifier};

/// Parameters the engine sets itself; never taken from the login request.
const RESERVED_PARAMETERS: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
];

/// Generates a URL-safe random token with 256 bits of entropy.
#[must_use]
pub fn random_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A prepared authorization request for one login attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider URL to redirect the user agent to.
    pub authorization_url: Url,
    /// CSRF state echoed back on the callback.
    pub state: String,
    /// Nonce expected in the ID token.
    pub nonce: String,
    /// Callback URL registered for this client.
    pub redirect_uri: Url,
    /// Scope requested at the authorization endpoint.
    pub scope: String,
    /// Forwarded login parameters, in request order.
    pub passthrough: Vec<(String, String)>,
    /// PKCE verifier for the token exchange.
    pub pkce_verifier: PkceVerifier,
}

impl AuthorizationRequest {
    /// Builds an authorization request.
    ///
    /// `inbound_params` are the query parameters of the host login request.
    /// Only names on the configured passthrough allow-list are forwarded, each
    /// at most once; engine-owned parameters such as `state` are never
    /// forwarded.
    ///
    /// # Errors
    ///
    /// - `InvalidRedirectUri` if `requested_redirect_uri` is not one of the
    ///   configured callback URLs
    /// - `DiscoveryUnavailable` if the authorization endpoint is not a URL
    pub fn build<'a, I>(
        config: &ProviderConfig,
        discovery: &OidcDiscoveryDocument,
        requested_redirect_uri: &str,
        inbound_params: I,
    ) -> ConnectResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let redirect_uri = validate_redirect_uri(config, requested_redirect_uri)?;

        let mut authorization_url = Url::parse(&discovery.authorization_endpoint).map_err(|e| {
            ConnectError::DiscoveryUnavailable(format!("invalid authorization endpoint: {e}"))
        })?;

        let passthrough = select_passthrough(config, inbound_params);
        let state = random_token();
        let nonce = random_token();
        let pkce_verifier = PkceVerifier::generate();
        let challenge = pkce_verifier.challenge();

        {
            let mut params = authorization_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &config.client_id);
            params.append_pair("redirect_uri", redirect_uri.as_str());
            params.append_pair("scope", &config.authorize_scope);
            params.append_pair("state", &state);
            params.append_pair("nonce", &nonce);
            params.append_pair("code_challenge", challenge.as_str());
            params.append_pair("code_challenge_method", CHALLENGE_METHOD_S256);

            for (name, value) in &passthrough {
                params.append_pair(name, value);
            }
        }

        tracing::debug!(
            endpoint = %discovery.authorization_endpoint,
            forwarded = passthrough.len(),
            "Built authorization request"
        );

        Ok(Self {
            authorization_url,
            state,
            nonce,
            redirect_uri,
            scope: config.authorize_scope.clone(),
            passthrough,
            pkce_verifier,
        })
    }
}

/// Checks that `requested` exactly matches a configured callback URL.
fn validate_redirect_uri(config: &ProviderConfig, requested: &str) -> ConnectResult<Url> {
    let url = Url::parse(requested)
        .map_err(|e| ConnectError::InvalidRedirectUri(format!("{requested}: {e}")))?;

    if url.fragment().is_some() {
        return Err(ConnectError::InvalidRedirectUri(format!(
            "{requested}: fragments are not allowed"
        )));
    }

    if config.redirect_uris.iter().any(|allowed| *allowed == url) {
        Ok(url)
    } else {
        Err(ConnectError::InvalidRedirectUri(format!(
            "{requested}: not registered for client {}",
            config.client_id
        )))
    }
}

fn select_passthrough<'a, I>(config: &ProviderConfig, inbound_params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut selected: Vec<(String, String)> = Vec::new();
    for (name, value) in inbound_params {
        if RESERVED_PARAMETERS.contains(&name) || !config.is_passthrough_allowed(name) {
            continue;
        }
        if selected.iter().any(|(existing, _)| existing == name) {
            continue;
        }
        selected.push((name.to_string(), value.to_string()));
    }
    selected
}

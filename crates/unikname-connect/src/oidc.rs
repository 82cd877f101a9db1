//! OpenID Connect discovery document.
//!
//! Only the provider metadata the login flow reads is modelled; unknown
//! fields are ignored.

use serde::{Deserialize, Serialize};

/// Provider metadata from `.well-known/openid-configuration`.
///
/// # Example
///
/// ```ignore
/// use unikname_connect::oidc::OidcDiscoveryDocument;
///
/// let json = r#"{
///     "issuer": "https://connect.unikname.com/oidc",
///     "authorization_endpoint": "https://connect.unikname.com/oidc/authorize",
///     "token_endpoint": "https://connect.unikname.com/oidc/token",
///     "jwks_uri": "https://connect.unikname.com/oidc/jwks"
/// }"#;
///
/// let doc: OidcDiscoveryDocument = serde_json::from_str(json)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// Issuer identifier that ID tokens must carry in `iss`.
    pub issuer: String,

    /// Authorization endpoint the user agent is redirected to.
    pub authorization_endpoint: String,

    /// Token endpoint for the code exchange.
    pub token_endpoint: String,

    /// JSON Web Key Set used to verify ID token signatures.
    pub jwks_uri: String,

    /// Supported `response_type` values.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported ID token signing algorithms.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// Supported scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported grant types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported client authentication methods at the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// Supported PKCE code challenge methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

impl OidcDiscoveryDocument {
    /// Returns `true` if this provider supports the specified response type.
    ///
    /// Providers that do not advertise response types are assumed to support
    /// the authorization code flow.
    #[must_use]
    pub fn supports_response_type(&self, response_type: &str) -> bool {
        self.response_types_supported.is_empty()
            || self
                .response_types_supported
                .iter()
                .any(|rt| rt == response_type)
    }

    /// Returns `true` if this provider supports PKCE with the specified method.
    ///
    /// Providers that do not advertise methods are assumed to accept any.
    #[must_use]
    pub fn supports_pkce_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.is_empty() || methods.iter().any(|m| m == method))
    }

    /// Returns `true` if the token endpoint accepts the given auth method.
    ///
    /// Per OIDC Discovery, an absent list means `client_secret_basic` only.
    #[must_use]
    pub fn supports_token_auth_method(&self, method: &str) -> bool {
        match &self.token_endpoint_auth_methods_supported {
            Some(methods) => methods.iter().any(|m| m == method),
            None => method == "client_secret_basic",
        }
    }
}

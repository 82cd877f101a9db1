//! End-to-end login flows against a mock provider.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{CALLBACK, CLIENT_SECRET, MockProvider, engine_config};
use serde_json::json;
use unikname_connect::{
    Authenticator, CallbackParams, ConnectError, ExistingAccount, LinkAction, LoginRedirect,
    MiddlewareRegistry, OidcEngine, StaticSettings, UniknameAuthenticator,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn query(redirect: &LoginRedirect) -> Vec<(String, String)> {
    redirect
        .authorization_url
        .query_pairs()
        .into_owned()
        .collect()
}

fn nonce(redirect: &LoginRedirect) -> String {
    query(redirect)
        .into_iter()
        .find(|(name, _)| name == "nonce")
        .map(|(_, value)| value)
        .unwrap()
}

fn callback(redirect: &LoginRedirect) -> CallbackParams {
    CallbackParams::from_query([("code", "auth-code-1"), ("state", redirect.state.as_str())])
}

#[tokio::test]
async fn test_successful_login() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();
    let config = provider.config();

    let redirect = engine
        .start_login(
            &config,
            CALLBACK,
            [
                ("login_hint", "alice"),
                ("login_hint", "mallory"),
                ("prompt", "none"),
                ("state", "attacker-state"),
            ],
        )
        .await
        .unwrap();

    assert!(
        redirect
            .authorization_url
            .as_str()
            .starts_with(&format!("{}/authorize?", provider.issuer()))
    );
    let pairs = query(&redirect);
    let params: HashMap<_, _> = pairs.iter().cloned().collect();
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], "forum");
    assert_eq!(params["redirect_uri"], CALLBACK);
    assert_eq!(params["scope"], "openid email profile");
    assert_eq!(params["state"], redirect.state);
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["login_hint"], "alice");
    assert!(!params.contains_key("prompt"));
    assert_eq!(pairs.iter().filter(|(name, _)| name == "login_hint").count(), 1);
    assert_eq!(pairs.iter().filter(|(name, _)| name == "state").count(), 1);

    provider.mount_token(&provider.claims(&nonce(&redirect))).await;

    let resolution = engine
        .handle_callback(&config, &callback(&redirect), None)
        .await
        .unwrap();

    assert_eq!(resolution.external_id, "unikname-user-1");
    assert_eq!(resolution.email.as_deref(), Some("alice@example.com"));
    assert!(resolution.email_verified);
    assert_eq!(resolution.name.as_deref(), Some("Alice"));
    assert_eq!(resolution.link_action, LinkAction::Create);
    assert!(!resolution.link_change_permitted);

    let requests = provider.server.received_requests().await.unwrap();
    let token_request = requests
        .iter()
        .find(|r| r.url.path() == "/token")
        .unwrap();
    let body = String::from_utf8_lossy(&token_request.body).to_string();
    assert!(body.contains("grant_type=authorization_code"));
    assert!(body.contains("code=auth-code-1"));
    assert!(body.contains("code_verifier="));
    assert!(!body.contains(CLIENT_SECRET));
}

#[tokio::test]
async fn test_tampered_nonce_is_rejected() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();
    let config = provider.config();

    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    let tampered = format!("{}x", nonce(&redirect));
    provider.mount_token(&provider.claims(&tampered)).await;

    let failure = engine
        .handle_callback(&config, &callback(&redirect), None)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ConnectError::NonceMismatch));
    assert!(failure.redirect.is_none());
    assert_eq!(
        failure.public_message,
        "Sorry, there was an error authorizing your account. Please try again."
    );
}

#[tokio::test]
async fn test_foreign_audience_is_rejected() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();
    let config = provider.config();

    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    let mut claims = provider.claims(&nonce(&redirect));
    claims["aud"] = json!("another-client");
    provider.mount_token(&claims).await;

    let failure = engine
        .handle_callback(&config, &callback(&redirect), None)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ConnectError::AudienceMismatch));
}

#[tokio::test]
async fn test_access_denied_is_routed() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();
    let config = provider.config();

    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    let params = CallbackParams::from_query([
        ("error", "access_denied"),
        ("error_description", "The user denied the request"),
        ("state", redirect.state.as_str()),
    ]);

    let failure = engine
        .handle_callback(&config, &params, None)
        .await
        .unwrap_err();

    assert_eq!(failure.error.kind(), "provider_error");
    assert_eq!(failure.redirect.as_deref(), Some("/login-error"));
    assert_eq!(provider.requests_to("/token").await, 0);
}

#[tokio::test]
async fn test_rejected_code_is_not_retried() {
    let provider = MockProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "authorization code expired"
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let engine = OidcEngine::new(engine_config()).unwrap();
    let mut settings = provider.settings();
    settings.error_redirects = "invalid_grant|/session-expired".to_string();
    let config = unikname_connect::ProviderConfig::from_settings(&settings).unwrap();

    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    let failure = engine
        .handle_callback(&config, &callback(&redirect), None)
        .await
        .unwrap_err();

    match &failure.error {
        ConnectError::TokenExchangeFailed { provider_message } => {
            assert_eq!(provider_message, "invalid_grant: authorization code expired");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failure.redirect.as_deref(), Some("/session-expired"));
}

#[tokio::test]
async fn test_forged_state_makes_no_network_call() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();

    let params = CallbackParams::from_query([("code", "auth-code-1"), ("state", "forged")]);
    let failure = engine
        .handle_callback(&provider.config(), &params, None)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ConnectError::StateMismatch));
    assert!(provider.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_login_through_registered_strategy() {
    let provider = MockProvider::start().await;
    let mut settings = provider.settings();
    settings.allow_association_change = true;
    let source = StaticSettings::new(settings);
    let engine = Arc::new(OidcEngine::new(engine_config()).unwrap());
    let authenticator = UniknameAuthenticator::new(Arc::new(source), engine);

    let mut registry = MiddlewareRegistry::new();
    authenticator.register_middleware(&mut registry);
    let strategy = registry.get(authenticator.name()).unwrap();

    let redirect = strategy
        .request_phase(CALLBACK, &[("ui_locales".to_string(), "fr".to_string())])
        .await
        .unwrap();
    assert!(query(&redirect).contains(&("ui_locales".to_string(), "fr".to_string())));

    provider.mount_token(&provider.claims(&nonce(&redirect))).await;

    let account = ExistingAccount::linked("42", "previous-subject");
    let resolution = strategy
        .callback_phase(&callback(&redirect), Some(&account))
        .await
        .unwrap();

    assert_eq!(resolution.link_action, LinkAction::Replace);
    assert!(resolution.link_allowed());
    assert!(authenticator.can_revoke());
}

#[tokio::test]
async fn test_signed_in_account_cannot_connect_without_permission() {
    let provider = MockProvider::start().await;
    let engine = OidcEngine::new(engine_config()).unwrap();
    let config = provider.config();
    assert!(!config.allow_association_change);

    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    provider.mount_token(&provider.claims(&nonce(&redirect))).await;

    let account = ExistingAccount::unlinked("42");
    let resolution = engine
        .handle_callback(&config, &callback(&redirect), Some(&account))
        .await
        .unwrap();

    assert_eq!(resolution.link_action, LinkAction::Connect);
    assert!(!resolution.link_change_permitted);
    assert!(!resolution.link_allowed());
}

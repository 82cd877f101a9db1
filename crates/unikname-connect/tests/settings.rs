//! Settings files drive the engine end to end.

mod common;

use std::io::Write;
use std::time::Duration;

use common::{CALLBACK, MockProvider};
use unikname_connect::{ConnectSettings, OidcEngine, ProviderConfig};

#[tokio::test]
async fn test_engine_from_settings_file() {
    let provider = MockProvider::start().await;

    let mut settings = ConnectSettings::default();
    settings.provider = provider.settings();
    settings.engine = common::engine_config().with_request_timeout(Duration::from_secs(7));

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(toml::to_string(&settings).unwrap().as_bytes())
        .unwrap();

    let loaded = ConnectSettings::load(Some(file.path())).unwrap();
    assert_eq!(loaded.engine.request_timeout, Duration::from_secs(7));
    assert_eq!(loaded.provider.client_id, "forum");
    assert!(loaded.engine.allow_http);

    let config = ProviderConfig::from_settings(&loaded.provider).unwrap();
    assert_eq!(config.error_redirects.len(), 2);
    assert!(config.is_passthrough_allowed("ui_locales"));

    let engine = OidcEngine::new(loaded.engine).unwrap();
    let redirect = engine
        .start_login(&config, CALLBACK, std::iter::empty())
        .await
        .unwrap();
    assert_eq!(
        redirect.authorization_url.path(),
        "/authorize",
        "redirect should target the discovered endpoint"
    );
}

#[test]
fn test_debug_output_hides_secret() {
    let settings = ConnectSettings {
        provider: unikname_connect::ProviderSettings {
            client_id: "forum".to_string(),
            client_secret: "s3cr3t".to_string(),
            discovery_document_url: "https://id.example.com/.well-known/openid-configuration"
                .to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    assert!(!format!("{settings:?}").contains("s3cr3t"));
    let config = ProviderConfig::from_settings(&settings.provider).unwrap();
    assert!(!format!("{config:?}").contains("s3cr3t"));
}

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use time::OffsetDateTime;
use unikname_connect::{EngineConfig, ProviderConfig, ProviderSettings};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "forum";
pub const CLIENT_SECRET: &str = "s3cr3t";
pub const CALLBACK: &str = "https://forum.example.com/auth/unikname/callback";
pub const KID: &str = "integration-key";

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub struct SigningKey {
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl SigningKey {
    pub fn shared() -> &'static SigningKey {
        static KEY: OnceLock<SigningKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
            let pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
            SigningKey {
                encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
                n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
            }
        })
    }

    pub fn jwks(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": KID,
                "use": "sig",
                "alg": "RS256",
                "n": self.n,
                "e": self.e
            }]
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        jsonwebtoken::encode(&header, claims, &self.encoding_key).unwrap()
    }
}

/// Wiremock-backed Unikname Connect provider.
pub struct MockProvider {
    pub server: MockServer,
}

impl MockProvider {
    pub async fn start() -> Self {
        Self::start_with_discovery_delay(Duration::ZERO).await
    }

    pub async fn start_with_discovery_delay(delay: Duration) -> Self {
        let server = MockServer::start().await;
        let base = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "issuer": base,
                        "authorization_endpoint": format!("{base}/authorize"),
                        "token_endpoint": format!("{base}/token"),
                        "jwks_uri": format!("{base}/jwks"),
                        "response_types_supported": ["code"],
                        "id_token_signing_alg_values_supported": ["RS256"],
                        "code_challenge_methods_supported": ["S256"]
                    }))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(SigningKey::shared().jwks()))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.server.uri())
    }

    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            enabled: true,
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            discovery_document_url: self.discovery_url(),
            authorize_scope: "openid email profile".to_string(),
            authorize_parameters: "login_hint|ui_locales".to_string(),
            error_redirects: "access_denied|/login-error\nconsent_required|/consent-error"
                .to_string(),
            redirect_uris: CALLBACK.to_string(),
            ..ProviderSettings::default()
        }
    }

    pub fn config(&self) -> ProviderConfig {
        ProviderConfig::from_settings(&self.settings()).unwrap()
    }

    pub fn claims(&self, nonce: &str) -> Value {
        json!({
            "iss": self.issuer(),
            "sub": "unikname-user-1",
            "aud": CLIENT_ID,
            "exp": now() + 300,
            "iat": now(),
            "nonce": nonce,
            "email": "alice@example.com",
            "email_verified": true,
            "name": "Alice"
        })
    }

    /// Answers token requests with an ID token signed over `claims`.
    pub async fn mount_token(&self, claims: &Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-123",
                "token_type": "Bearer",
                "expires_in": 3600,
                "id_token": SigningKey::shared().sign(claims)
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig::default().with_allow_http(true)
}

//! Shared helpers for unit tests: an RSA signing key and its JWKS.

use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use time::OffsetDateTime;

pub(crate) fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) struct TestKey {
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestKey {
    pub(crate) const KID: &'static str = "test-key-1";

    /// One key per test binary; RSA generation is slow in debug builds.
    pub(crate) fn shared() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
            let pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
            TestKey {
                encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
                n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
            }
        })
    }

    pub(crate) fn jwks(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "kid": Self::KID,
                "use": "sig",
                "alg": "RS256",
                "n": self.n,
                "e": self.e
            }]
        })
    }

    fn encode(&self, header: &Header, claims: &Value) -> String {
        jsonwebtoken::encode(header, claims, &self.encoding_key).unwrap()
    }

    pub(crate) fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, Self::KID)
    }

    pub(crate) fn sign_with_kid(&self, claims: &Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        self.encode(&header, claims)
    }

    pub(crate) fn sign_without_kid(&self, claims: &Value) -> String {
        self.encode(&Header::new(Algorithm::RS256), claims)
    }
}

//! Shared fixtures: RSA signing keys, published key documents and token minting.

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use diego_auth::config::KeyStoreConfig;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{Value, json};

pub struct TestKey {
    pub kid: &'static str,
    pub private: RsaPrivateKey,
    pub pem: String,
}

impl TestKey {
    fn generate(kid: &'static str) -> Self {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
        let pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode key")
            .to_string();
        Self { kid, private, pem }
    }

    /// The key as published in a `token_keys` document.
    pub fn jwk(&self) -> Value {
        let public = self.private.to_public_key();
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "alg": "RS256",
            "use": "sig",
            "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        })
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_rsa_pem(self.pem.as_bytes()).expect("encoding key")
    }
}

/// The provider's current signing key.
pub fn k1() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate("k1"))
}

/// The provider's next signing key, published after rotation.
pub fn k2() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate("k2"))
}

pub fn key_set(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// UAA-shaped claims for `user`, valid for an hour.
pub fn claims(user: &str, scopes: &[&str]) -> Value {
    json!({
        "sub": format!("{user}-id"),
        "user_id": format!("{user}-id"),
        "user_name": user,
        "client_id": "cf",
        "scope": scopes,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// Signs `claims` with `key`, advertising the key's id.
pub fn mint(key: &TestKey, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid.to_string());
    jsonwebtoken::encode(&header, claims, &key.encoding_key()).expect("sign token")
}

/// Key store settings that accept the plain-HTTP mock server.
pub fn key_store_config() -> KeyStoreConfig {
    KeyStoreConfig {
        allow_http: true,
        refresh_timeout: Duration::from_secs(2),
        startup_timeout: Duration::from_secs(2),
        ..KeyStoreConfig::default()
    }
}

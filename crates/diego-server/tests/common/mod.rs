//! Mock UAA and request helpers for router-level tests.

#![allow(dead_code)]

use std::sync::OnceLock;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use diego_auth::AuthMode;
use diego_server::config::AppConfig;
use diego_server::{build_app, build_auth_state};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OPERATOR_SCOPE: &str = "diego-analyzer.operator";
pub const VIEWER_SCOPE: &str = "diego-analyzer.viewer";

struct SigningKey {
    private: RsaPrivateKey,
    pem: String,
}

fn signing_key() -> &'static SigningKey {
    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key");
        let pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode key")
            .to_string();
        SigningKey { private, pem }
    })
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// A UAA-issued access token for `user` with `scopes`.
pub fn token_for(user: &str, scopes: &[&str]) -> String {
    let claims = json!({
        "sub": format!("{user}-id"),
        "user_id": format!("{user}-id"),
        "user_name": user,
        "client_id": "cf",
        "scope": scopes,
        "exp": now() + 3600,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("uaa-key-1".to_string());
    let key = EncodingKey::from_rsa_pem(signing_key().pem.as_bytes()).expect("encoding key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign token")
}

/// Starts a UAA with one signing key and two users:
/// `ops` (operator, scopes only inside the token) and `viewer` (viewer,
/// scopes in the response). Every password is `pw`.
pub async fn start_uaa() -> MockServer {
    let server = MockServer::start().await;
    let public = signing_key().private.to_public_key();
    Mock::given(method("GET"))
        .and(path("/token_keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{
                "kty": "RSA",
                "kid": "uaa-key-1",
                "alg": "RS256",
                "use": "sig",
                "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("username=ops"))
        .and(body_string_contains("password=pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token_for("ops", &["openid", OPERATOR_SCOPE]),
            "refresh_token": "rt-ops",
            "expires_in": 3600,
            "user_id": "ops-id",
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("username=viewer"))
        .and(body_string_contains("password=pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token_for("viewer", &["openid", VIEWER_SCOPE]),
            "refresh_token": "rt-viewer",
            "expires_in": 3600,
            "user_id": "viewer-id",
            "scope": format!("openid {VIEWER_SCOPE}"),
        })))
        .mount(&server)
        .await;

    // Anything else is a bad credential.
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized",
            "error_description": "Bad credentials"
        })))
        .with_priority(10)
        .mount(&server)
        .await;

    server
}

/// Configuration pointing at the mock UAA.
pub fn config_for(uaa: &MockServer, mode: AuthMode) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.mode = mode;
    cfg.auth.cookie.secure = false;
    cfg.auth.identity_provider.uaa_url = Some(uaa.uri());
    cfg.auth.key_store.allow_http = true;
    cfg
}

pub async fn app(cfg: &AppConfig) -> Router {
    let auth = build_auth_state(&cfg.auth).await;
    build_app(cfg, auth)
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("infallible")
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn login_request(username: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap()
}

/// Browser state after a login: both cookies as set by the server.
#[derive(Debug, Clone)]
pub struct Browser {
    pub session: String,
    pub csrf: String,
}

impl Browser {
    pub fn from_response(res: &Response<Body>) -> Self {
        let mut session = None;
        let mut csrf = None;
        for value in res.headers().get_all(header::SET_COOKIE) {
            let value = value.to_str().expect("ascii cookie");
            let pair = value.split(';').next().unwrap_or_default();
            let (name, val) = pair.split_once('=').expect("name=value");
            match name {
                "DIEGO_SESSION" => session = Some(val.to_string()),
                "DIEGO_CSRF" => csrf = Some(val.to_string()),
                _ => {}
            }
        }
        Self {
            session: session.expect("session cookie"),
            csrf: csrf.expect("csrf cookie"),
        }
    }

    pub fn cookie_header(&self) -> String {
        format!("DIEGO_SESSION={}; DIEGO_CSRF={}", self.session, self.csrf)
    }

    pub fn get(&self, uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, self.cookie_header())
            .body(Body::empty())
            .unwrap()
    }

    /// A state-changing request, optionally echoing the CSRF token.
    pub fn post(&self, uri: &str, echo_csrf: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::COOKIE, self.cookie_header());
        if echo_csrf {
            builder = builder.header("X-CSRF-Token", &self.csrf);
        }
        builder.body(Body::empty()).unwrap()
    }
}

pub async fn login(app: &Router, username: &str) -> Browser {
    let res = send(app, login_request(username, "pw")).await;
    assert_eq!(res.status(), 200, "login as {username}");
    Browser::from_response(&res)
}

pub fn bearer(uri: &str, method: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

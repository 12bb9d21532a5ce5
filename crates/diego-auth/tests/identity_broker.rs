//! Token exchanges and URL discovery against a mock UAA.

mod common;

use std::sync::Arc;

use common::{claims, k1, mint};
use diego_auth::broker::{BrokerError, IdentityBroker, UaaIdentityBroker, discover_uaa_url};
use diego_auth::config::{IdentityProviderConfig, SessionConfig};
use diego_auth::session::{SessionManager, SessionStore};
use diego_auth::{AuthError, Role};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `cf:` with an empty secret.
const CF_BASIC_AUTH: &str = "Basic Y2Y6";

fn broker(server: &MockServer) -> UaaIdentityBroker {
    UaaIdentityBroker::new(&server.uri(), &IdentityProviderConfig::default()).unwrap()
}

#[tokio::test]
async fn password_grant_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("authorization", CF_BASIC_AUTH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "token_type": "bearer",
            "expires_in": 599,
            "scope": "openid diego-analyzer.viewer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let grant = broker(&server)
        .password_grant("alice", "s3cret")
        .await
        .unwrap();
    assert_eq!(grant.access_token, "at-1");
    assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(grant.expires_in, 599);
    assert_eq!(grant.scopes, vec!["openid", "diego-analyzer.viewer"]);
}

#[tokio::test]
async fn rejected_and_failed_grants() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("username=alice"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized", "error_description": "Bad credentials"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("username=bob"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let broker = broker(&server);
    let err = broker.password_grant("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, BrokerError::Rejected { status: 401 }));

    let err = broker.password_grant("bob", "pw").await.unwrap_err();
    assert!(matches!(err, BrokerError::Upstream { status: 502 }));
}

#[tokio::test]
async fn refresh_grant_without_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2", "expires_in": 600
        })))
        .mount(&server)
        .await;

    let grant = broker(&server).refresh_grant("rt-1").await.unwrap();
    assert_eq!(grant.access_token, "at-2");
    assert_eq!(grant.refresh_token, None);
}

#[tokio::test]
async fn login_resolves_role_from_token_scopes() {
    let server = MockServer::start().await;
    // No `scope` field in the response; the role comes from the token payload.
    let access_token = mint(k1(), &claims("ops", &["openid", "diego-analyzer.operator"]));
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "refresh_token": "rt",
            "expires_in": 3600,
            "user_id": "ops-guid",
        })))
        .mount(&server)
        .await;

    let store = Arc::new(SessionStore::new(SessionConfig::default()));
    let manager = SessionManager::new(store.clone(), Some(Arc::new(broker(&server))));

    let session = manager.login("ops", "pw").await.unwrap();
    assert_eq!(session.role, Role::Operator);
    assert_eq!(session.user_id, "ops-guid");
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn login_maps_provider_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let store = Arc::new(SessionStore::new(SessionConfig::default()));
    let manager = SessionManager::new(store.clone(), Some(Arc::new(broker(&server))));
    assert!(matches!(
        manager.login("alice", "wrong").await.unwrap_err(),
        AuthError::InvalidCredentials
    ));

    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    assert!(matches!(
        manager.login("alice", "pw").await.unwrap_err(),
        AuthError::UpstreamUnavailable { .. }
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn discovers_uaa_url_from_cf_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "links": {
                "self": { "href": server.uri() },
                "login": { "href": "https://login.sys.example.com" },
                "uaa": { "href": "https://uaa.sys.example.com" }
            }
        })))
        .mount(&server)
        .await;

    let url = discover_uaa_url(&server.uri(), &IdentityProviderConfig::default())
        .await
        .unwrap();
    assert_eq!(url, "https://login.sys.example.com");
}

#[tokio::test]
async fn discovery_falls_back_to_uaa_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "links": { "uaa": { "href": "https://uaa.sys.example.com" } }
        })))
        .mount(&server)
        .await;

    let url = discover_uaa_url(&server.uri(), &IdentityProviderConfig::default())
        .await
        .unwrap();
    assert_eq!(url, "https://uaa.sys.example.com");
}

#[tokio::test]
async fn discovery_reports_upstream_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/info"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = discover_uaa_url(&server.uri(), &IdentityProviderConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Upstream { status: 404 }));
}

//! Cross-origin behavior of the assembled router.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{app, config_for, send, start_uaa};
use diego_auth::AuthMode;

const DASHBOARD: &str = "https://dashboard.example.com";

async fn app_with_origins(origins: &[&str]) -> Router {
    let uaa = start_uaa().await;
    let mut cfg = config_for(&uaa, AuthMode::Required);
    cfg.cors.allowed_origins = origins.iter().map(|o| o.to_string()).collect();
    app(&cfg).await
}

fn from_origin(origin: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/v1/health")
        .header(header::ORIGIN, origin)
        .body(Body::empty())
        .unwrap()
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/auth/logout")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-csrf-token")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn allowed_origin_gets_credentialed_cors_headers() {
    let app = app_with_origins(&[DASHBOARD]).await;

    let res = send(&app, from_origin(DASHBOARD)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        DASHBOARD
    );
    assert_eq!(
        res.headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .unwrap(),
        "true"
    );
}

#[tokio::test]
async fn preflight_allows_csrf_header() {
    let app = app_with_origins(&[DASHBOARD]).await;

    let res = send(&app, preflight(DASHBOARD)).await;
    assert!(res.status().is_success());
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        DASHBOARD
    );
    let allowed_headers = res
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed_headers.contains("x-csrf-token"), "{allowed_headers}");
    let allowed_methods = res
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(allowed_methods.contains("POST"), "{allowed_methods}");
}

#[tokio::test]
async fn unlisted_origin_gets_no_cors_headers() {
    let app = app_with_origins(&[DASHBOARD]).await;

    let res = send(&app, from_origin("https://evil.example.net")).await;
    assert!(
        res.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );

    let res = send(&app, preflight("https://evil.example.net")).await;
    assert!(
        res.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

#[tokio::test]
async fn empty_allow_list_blocks_every_origin() {
    let app = app_with_origins(&[]).await;

    for origin in [DASHBOARD, "http://localhost:3000"] {
        let res = send(&app, from_origin(origin)).await;
        // Same-origin style requests still work, browsers just cannot read them.
        assert_eq!(res.status(), StatusCode::OK);
        assert!(
            res.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }
}

//! CSRF layer for public, state-changing auth routes.
//!
//! Logout and refresh sit outside the authentication middleware because they
//! manage the session themselves, yet they change state. This layer applies
//! the same double-submit check to them. A request skips the check when:
//!
//! - its method is GET, HEAD or OPTIONS
//! - it targets the login route, which must work with stale cookies
//! - it carries an `Authorization` header (bearer callers are not browsers)
//! - it has no session cookie (nothing to protect)

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use super::auth::AuthState;
use crate::csrf::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME, CsrfGuard, is_safe_method};
use crate::error::AuthError;
use crate::session::SESSION_COOKIE_NAME;

/// Path suffix of the login route.
const LOGIN_PATH_SUFFIX: &str = "/auth/login";

pub async fn csrf_protection(State(state): State<AuthState>, req: Request, next: Next) -> Response {
    if state.mode == crate::config::AuthMode::Disabled
        || is_safe_method(req.method())
        || req.uri().path().ends_with(LOGIN_PATH_SUFFIX)
        || req.headers().contains_key(AUTHORIZATION)
    {
        return next.run(req).await;
    }

    let jar = CookieJar::from_headers(req.headers());
    let Some(session_id) = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
    else {
        return next.run(req).await;
    };

    let cookie = jar.get(CSRF_COOKIE_NAME).map(|c| c.value().to_string());
    let header = req
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // A live session also pins the token it was issued; a stale cookie only
    // needs the pair to match so logout can still clear it.
    let bound = state
        .sessions
        .store()
        .get(&session_id)
        .await
        .map(|s| s.csrf_token);
    let valid = match bound {
        Some(bound) => CsrfGuard::check_bound(cookie.as_deref(), header.as_deref(), &bound),
        None => CsrfGuard::check(cookie.as_deref(), header.as_deref()),
    };

    if !valid {
        tracing::warn!(
            method = %req.method(),
            path = %req.uri().path(),
            "CSRF validation failed"
        );
        return AuthError::CsrfMismatch.into_response();
    }

    next.run(req).await
}

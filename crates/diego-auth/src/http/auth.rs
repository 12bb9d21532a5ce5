//! Browser-facing auth endpoints.
//!
//! The access and refresh tokens never leave the server; the browser gets an
//! opaque session cookie and a script-readable CSRF cookie.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RateLimitingConfig;
use crate::error::AuthError;
use crate::middleware::{AuthState, csrf_protection};
use crate::rate_limit::{RateLimit, RateLimitTier, rate_limit};
use crate::role::Role;
use crate::session::{
    SESSION_COOKIE_NAME, clear_csrf_cookie, clear_session_cookie, csrf_cookie, session_cookie,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub username: String,
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}

// =============================================================================
// Routes
// =============================================================================

/// Auth routes with their rate limit tiers and the CSRF layer applied.
///
/// Mount under `/api/v1` (and the legacy `/api`). Cloning the returned router
/// shares its rate limit counters.
pub fn auth_routes(state: AuthState, limits: &RateLimitingConfig) -> Router {
    let auth_tier = RateLimit::new(RateLimitTier::Auth, limits);
    let refresh_tier = RateLimit::new(RateLimitTier::Refresh, limits);

    Router::new()
        .route(
            "/auth/login",
            post(login).layer(middleware::from_fn_with_state(auth_tier.clone(), rate_limit)),
        )
        .route(
            "/auth/logout",
            post(logout).layer(middleware::from_fn_with_state(auth_tier, rate_limit)),
        )
        .route("/auth/me", get(me))
        .route(
            "/auth/refresh",
            post(refresh).layer(middleware::from_fn_with_state(refresh_tier, rate_limit)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            csrf_protection,
        ))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /auth/login`
pub async fn login(
    State(state): State<AuthState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return AuthError::invalid_request("Invalid request body").into_response();
    };
    if request.username.is_empty() || request.password.is_empty() {
        return AuthError::invalid_request("Username and password are required").into_response();
    }

    // A stale session from an earlier login is replaced, not kept alive.
    if let Some(previous) = session_id(&jar) {
        state.sessions.logout(&previous).await;
    }

    let session = match state
        .sessions
        .login(&request.username, &request.password)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(username = %request.username, error = %e, "Login failed");
            return e.into_response();
        }
    };

    let jar = jar
        .add(session_cookie(&session.id, &state.cookies))
        .add(csrf_cookie(&session.csrf_token, &state.cookies));

    (
        jar,
        Json(LoginResponse {
            success: true,
            username: session.username,
            user_id: session.user_id,
            role: session.role,
        }),
    )
        .into_response()
}

/// `POST /auth/logout`. Always succeeds and clears both cookies.
pub async fn logout(State(state): State<AuthState>, jar: CookieJar) -> Response {
    if let Some(id) = session_id(&jar) {
        state.sessions.logout(&id).await;
    }
    let jar = clear_cookies(jar, &state);
    (jar, Json(json!({ "success": true }))).into_response()
}

/// `GET /auth/me`. Reads the session without refreshing it.
pub async fn me(State(state): State<AuthState>, jar: CookieJar) -> Json<UserInfoResponse> {
    let Some(id) = session_id(&jar) else {
        return Json(UserInfoResponse::default());
    };
    match state.sessions.store().get(&id).await {
        Some(session) => Json(UserInfoResponse {
            authenticated: true,
            username: Some(session.username),
            user_id: Some(session.user_id),
            role: Some(session.role),
        }),
        None => Json(UserInfoResponse::default()),
    }
}

/// `POST /auth/refresh`. Refreshes the session's tokens if they are close to
/// expiring.
pub async fn refresh(State(state): State<AuthState>, jar: CookieJar) -> Response {
    let Some(id) = session_id(&jar) else {
        return AuthError::AuthenticationRequired.into_response();
    };
    let Some(session) = state.sessions.store().get(&id).await else {
        return AuthError::SessionNotFound.into_response();
    };

    match state.sessions.refresh_if_needed(session).await {
        Ok((_, refreshed)) => Json(RefreshResponse { refreshed }).into_response(),
        Err(e) => {
            let jar = clear_cookies(jar, &state);
            (jar, e).into_response()
        }
    }
}

fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn clear_cookies(jar: CookieJar, state: &AuthState) -> CookieJar {
    jar.add(clear_session_cookie(&state.cookies))
        .add(clear_csrf_cookie(&state.cookies))
}

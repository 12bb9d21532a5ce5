//! Authentication middleware.
//!
//! Decides for every protected request whether it is authorized and, if so,
//! attaches an [`AuthContext`] to the request extensions.
//!
//! - Disabled mode: every request passes with a disabled context.
//! - An `Authorization` header takes precedence and must carry a verifiable
//!   `Bearer` token.
//! - Otherwise the session cookie is resolved; state-changing requests on
//!   the session path must also pass the CSRF check.
//! - Without any credential, optional mode continues anonymously and
//!   required mode rejects.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use super::types::AuthContext;
use crate::config::{AuthMode, CookieConfig};
use crate::csrf::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME, CsrfGuard, is_safe_method};
use crate::error::AuthError;
use crate::session::{SESSION_COOKIE_NAME, SessionManager};
use crate::token::TokenVerifier;

/// Shared state for the auth middleware and handlers.
#[derive(Clone, Debug)]
pub struct AuthState {
    pub mode: AuthMode,
    /// `None` when the signing keys could not be loaded at startup.
    pub verifier: Option<TokenVerifier>,
    pub sessions: SessionManager,
    pub cookies: CookieConfig,
}

impl AuthState {
    #[must_use]
    pub fn new(mode: AuthMode, sessions: SessionManager) -> Self {
        Self {
            mode,
            verifier: None,
            sessions,
            cookies: CookieConfig::default(),
        }
    }

    /// Enables bearer token verification.
    #[must_use]
    pub fn with_verifier(mut self, verifier: TokenVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_cookie_config(mut self, cookies: CookieConfig) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Authentication middleware for protected routes.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let outcome = resolve(&state, req.method(), req.uri(), req.headers()).await;
    match outcome {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(
                error = %e,
                category = %e.category(),
                method = %req.method(),
                path = %req.uri().path(),
                "Request rejected by authentication"
            );
            e.into_response()
        }
    }
}

/// Runs the authorize-or-reject decision for a request.
///
/// # Errors
///
/// Returns the reason the request is rejected.
pub async fn resolve(
    state: &AuthState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthError> {
    if state.mode == AuthMode::Disabled {
        return Ok(AuthContext::disabled());
    }

    if let Some(header) = headers.get(AUTHORIZATION) {
        return authenticate_bearer(state, header).await;
    }

    let jar = CookieJar::from_headers(headers);
    let session_id = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty());

    let Some(session_id) = session_id else {
        return match state.mode {
            AuthMode::Required => Err(AuthError::AuthenticationRequired),
            _ => Ok(AuthContext::anonymous()),
        };
    };

    let session = state.sessions.authenticate(session_id).await?;

    if !is_safe_method(method) {
        let cookie = jar.get(CSRF_COOKIE_NAME).map(|c| c.value());
        let header = headers
            .get(CSRF_HEADER_NAME)
            .and_then(|v| v.to_str().ok());
        if !CsrfGuard::check_bound(cookie, header, &session.csrf_token) {
            tracing::warn!(
                username = %session.username,
                method = %method,
                path = %uri.path(),
                "CSRF validation failed"
            );
            return Err(AuthError::CsrfMismatch);
        }
    }

    Ok(AuthContext::from_session(&session))
}

async fn authenticate_bearer(
    state: &AuthState,
    header: &HeaderValue,
) -> Result<AuthContext, AuthError> {
    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AuthError::InvalidAuthorizationScheme)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::malformed("empty bearer token"));
    }

    let verifier = state
        .verifier
        .as_ref()
        .ok_or(AuthError::BearerUnavailable)?;

    let claims = verifier.verify(token).await.map_err(|e| {
        tracing::debug!(reason = %e, "Bearer token rejected");
        AuthError::from(e)
    })?;

    Ok(AuthContext::from_claims(claims))
}

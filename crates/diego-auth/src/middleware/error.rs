//! Error response handling for the auth layer.
//!
//! Bodies are `{"error": <generic message>, "code": <status>}`. The message
//! never reveals which check failed; callers log the detailed error.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

/// Realm advertised in `WWW-Authenticate`.
const REALM: &str = "diego-analyzer";

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = error_details(&self);

        let mut body = json!({
            "error": message,
            "code": status.as_u16(),
        });

        let mut headers = HeaderMap::new();

        if let AuthError::RateLimited { retry_after_secs } = self {
            body["retry_after"] = json!(retry_after_secs);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(&self);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status and client-facing message for an error.
///
/// Only `InvalidRequest` passes its own message through.
#[must_use]
pub fn error_details(error: &AuthError) -> (StatusCode, String) {
    let (status, message) = match error {
        AuthError::MalformedCredential { .. }
        | AuthError::UnknownSigningKey { .. }
        | AuthError::UntrustedSignature
        | AuthError::ExpiredCredential
        | AuthError::NotYetValidCredential
        | AuthError::MissingIdentityClaims => {
            (StatusCode::UNAUTHORIZED, "Invalid or expired token")
        }
        AuthError::InvalidAuthorizationScheme => {
            (StatusCode::UNAUTHORIZED, "Invalid authorization format")
        }
        AuthError::BearerUnavailable => (
            StatusCode::UNAUTHORIZED,
            "Bearer authentication unavailable, please use web UI login",
        ),
        AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
        AuthError::SessionNotFound => (StatusCode::UNAUTHORIZED, "Invalid session"),
        AuthError::SessionExpired => (StatusCode::UNAUTHORIZED, "Session expired"),
        AuthError::AuthenticationRequired => (StatusCode::UNAUTHORIZED, "Authentication required"),
        AuthError::CsrfMismatch => (StatusCode::FORBIDDEN, "CSRF token missing or invalid"),
        AuthError::RoleInsufficient { .. } => (StatusCode::FORBIDDEN, "Insufficient permissions"),
        AuthError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
        AuthError::InvalidRequest { message } => return (StatusCode::BAD_REQUEST, message.clone()),
        // Provider outages surface like any other failed authentication.
        AuthError::UpstreamUnavailable { .. } => {
            (StatusCode::UNAUTHORIZED, "Authentication failed")
        }
        AuthError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    (status, message.to_string())
}

/// Builds the `WWW-Authenticate` value for a 401 (RFC 6750).
fn build_www_authenticate_header(error: &AuthError) -> String {
    match error.category() {
        crate::error::ErrorCategory::Token => {
            format!(r#"Bearer realm="{REALM}", error="invalid_token""#)
        }
        _ => format!(r#"Bearer realm="{REALM}""#),
    }
}

//! Authentication context attached to requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;

use crate::role::Role;
use crate::session::Session;
use crate::token::VerifiedClaims;

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Verified bearer token.
    Bearer,
    /// Server-side session cookie.
    Session,
    /// No credential, allowed in optional mode.
    Anonymous,
    /// Auth is disabled; nothing was checked.
    Disabled,
}

/// Identity and role of the caller, inserted into request extensions by the
/// authentication middleware.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub method: AuthMethod,
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub role: Role,
    pub scopes: Vec<String>,
}

impl AuthContext {
    /// Unauthenticated caller. Anonymous callers are treated as viewers.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            method: AuthMethod::Anonymous,
            username: None,
            user_id: None,
            role: Role::Viewer,
            scopes: Vec::new(),
        }
    }

    /// Caller in disabled mode. Role checks are bypassed for it.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            method: AuthMethod::Disabled,
            ..Self::anonymous()
        }
    }

    /// Context for a verified bearer token; the role is resolved per request.
    #[must_use]
    pub fn from_claims(claims: VerifiedClaims) -> Self {
        Self {
            method: AuthMethod::Bearer,
            role: claims.role(),
            username: Some(claims.username),
            user_id: Some(claims.user_id),
            scopes: claims.scopes,
        }
    }

    /// Context for a session; the role is the one cached at login.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            method: AuthMethod::Session,
            username: Some(session.username.clone()),
            user_id: Some(session.user_id.clone()),
            role: session.role,
            scopes: session.scopes.clone(),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self.method, AuthMethod::Bearer | AuthMethod::Session)
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// `user:{id}` for authenticated callers, used as a rate limit key.
    #[must_use]
    pub fn rate_limit_key(&self) -> Option<String> {
        self.user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("user:{id}"))
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    /// Requests that did not pass the authentication middleware are anonymous.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_else(AuthContext::anonymous))
    }
}

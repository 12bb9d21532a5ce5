//! Double-submit CSRF protection.
//!
//! At login the server issues a random token in a script-readable cookie and
//! remembers it on the session. State-changing requests authenticated by the
//! session cookie must echo the token in the `X-CSRF-Token` header.

use axum::http::Method;
use subtle::ConstantTimeEq;

/// Name of the script-readable CSRF cookie.
pub const CSRF_COOKIE_NAME: &str = "DIEGO_CSRF";

/// Header carrying the echoed CSRF token.
pub const CSRF_HEADER_NAME: &str = "X-CSRF-Token";

/// Encoded length of a token: 32 random bytes, unpadded base64url.
pub const CSRF_TOKEN_LEN: usize = 43;

/// Validates echoed CSRF tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfGuard;

impl CsrfGuard {
    /// Issues a fresh token from the OS random number generator.
    #[must_use]
    pub fn issue() -> String {
        crate::session::random_token()
    }

    /// Compares the cookie and header tokens.
    ///
    /// Both must be present and of the issued length. The comparison takes
    /// the same time wherever the tokens differ.
    #[must_use]
    pub fn check(cookie: Option<&str>, header: Option<&str>) -> bool {
        match (cookie, header) {
            (Some(cookie), Some(header))
                if cookie.len() == CSRF_TOKEN_LEN && header.len() == CSRF_TOKEN_LEN =>
            {
                constant_time_eq(cookie, header)
            }
            _ => false,
        }
    }

    /// Like [`CsrfGuard::check`], and the cookie must also be the token
    /// bound to the session at login.
    #[must_use]
    pub fn check_bound(cookie: Option<&str>, header: Option<&str>, bound: &str) -> bool {
        Self::check(cookie, header) && cookie.is_some_and(|c| constant_time_eq(c, bound))
    }
}

/// Methods that never change state and skip the CSRF check.
#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

//! Session and CSRF cookie construction.

use cookie::{Cookie, SameSite};

use crate::config::CookieConfig;
use crate::csrf::CSRF_COOKIE_NAME;

/// Name of the HttpOnly session cookie.
pub const SESSION_COOKIE_NAME: &str = "DIEGO_SESSION";

fn max_age(config: &CookieConfig) -> time::Duration {
    time::Duration::try_from(config.max_age).unwrap_or(time::Duration::HOUR)
}

/// Session id cookie: HttpOnly, SameSite=Strict.
#[must_use]
pub fn session_cookie(session_id: &str, config: &CookieConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, session_id.to_string()))
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(max_age(config))
        .build()
}

/// CSRF cookie: readable by page scripts so they can echo it in a header.
#[must_use]
pub fn csrf_cookie(csrf_token: &str, config: &CookieConfig) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, csrf_token.to_string()))
        .http_only(false)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age(config))
        .build()
}

/// Expired session cookie with matching attributes.
#[must_use]
pub fn clear_session_cookie(config: &CookieConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Expired CSRF cookie with matching attributes.
#[must_use]
pub fn clear_csrf_cookie(config: &CookieConfig) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, ""))
        .http_only(false)
        .secure(config.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

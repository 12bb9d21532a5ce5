//! Authentication, session and authorization layer for the Diego capacity
//! dashboard backend.
//!
//! Browsers log in with a username and password that are exchanged with the
//! UAA identity provider for tokens; the tokens stay server-side and the
//! browser holds an opaque session cookie plus a CSRF cookie. Programmatic
//! clients send UAA-issued JWTs as `Bearer` tokens, verified locally against
//! the provider's published signing keys.
//!
//! # Modules
//!
//! - [`jwks`] - signing key cache with single-flight refresh on unknown `kid`
//! - [`token`] - bearer token verification
//! - [`broker`] - password and refresh grants against UAA
//! - [`session`] - server-side session table and lifecycle
//! - [`role`] - scope to role mapping
//! - [`csrf`] - double-submit CSRF tokens
//! - [`middleware`] - axum authentication, CSRF and role layers
//! - [`rate_limit`] - fixed-window throttling tiers
//! - [`http`] - login, logout, me and refresh handlers

pub mod broker;
pub mod config;
pub mod csrf;
pub mod error;
pub mod http;
pub mod jwks;
pub mod middleware;
pub mod rate_limit;
pub mod role;
pub mod session;
pub mod token;

pub use config::{AuthConfig, AuthMode, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use role::Role;

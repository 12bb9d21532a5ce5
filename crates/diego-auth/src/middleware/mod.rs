//! HTTP middleware for authentication and authorization.
//!
//! - [`authenticate`] - bearer/session authentication plus session CSRF checks
//! - [`csrf_protection`] - CSRF checks for the public logout and refresh routes
//! - [`require_role`] - role gating after authentication
//! - [`rate_limit`] - per-tier fixed window throttling
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use diego_auth::middleware::{AuthState, authenticate};
//!
//! let app = Router::new()
//!     .route("/api/v1/identity", get(identity))
//!     .route_layer(middleware::from_fn_with_state(auth_state.clone(), authenticate));
//! ```

pub mod auth;
pub mod csrf;
pub mod error;
pub mod rbac;
pub mod types;

pub use crate::rate_limit::rate_limit;
pub use auth::{AuthState, authenticate, resolve};
pub use csrf::csrf_protection;
pub use rbac::{check_role, require_role};
pub use types::{AuthContext, AuthMethod};

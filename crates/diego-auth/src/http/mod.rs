//! HTTP handlers for the browser auth flow.
//!
//! - `POST /auth/login` - password login, sets session and CSRF cookies
//! - `POST /auth/logout` - deletes the session, clears cookies
//! - `GET /auth/me` - session status, no side effects
//! - `POST /auth/refresh` - proactive token refresh

pub mod auth;

pub use auth::{
    LoginRequest, LoginResponse, RefreshResponse, UserInfoResponse, auth_routes, login, logout,
    me, refresh,
};

//! Role-based route gating.
//!
//! Layered after `authenticate`, which attaches the caller's
//! [`AuthContext`]. Anonymous callers count as viewers.
//!
//! ```ignore
//! let operator_routes = Router::new()
//!     .route("/sessions/purge", post(purge))
//!     .route_layer(middleware::from_fn_with_state(Role::Operator, require_role));
//! ```

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::types::{AuthContext, AuthMethod};
use crate::error::AuthError;
use crate::role::Role;

/// Rejects callers whose role is below `required` with 403.
pub async fn require_role(State(required): State<Role>, req: Request, next: Next) -> Response {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .unwrap_or_else(AuthContext::anonymous);

    match check_role(&ctx, required) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::warn!(
                path = %req.uri().path(),
                method = %req.method(),
                required_role = %required,
                user_role = %ctx.role,
                username = ctx.username.as_deref().unwrap_or(""),
                "Access denied: insufficient permissions"
            );
            e.into_response()
        }
    }
}

/// Role decision for a context. Disabled mode bypasses role checks.
///
/// # Errors
///
/// Returns `RoleInsufficient` when the caller's role is too low.
pub fn check_role(ctx: &AuthContext, required: Role) -> Result<(), AuthError> {
    if ctx.method == AuthMethod::Disabled || ctx.role.satisfies(required) {
        Ok(())
    } else {
        Err(AuthError::RoleInsufficient {
            required,
            actual: ctx.role,
        })
    }
}

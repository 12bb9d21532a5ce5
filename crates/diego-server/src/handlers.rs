use axum::{Json, extract::State};
use diego_auth::middleware::{AuthContext, AuthState};
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Identity resolved for the caller and how it was authenticated.
pub async fn identity(ctx: AuthContext) -> Json<AuthContext> {
    Json(ctx)
}

/// Evicts expired sessions and reports how many were removed.
pub async fn purge_sessions(State(state): State<AuthState>, ctx: AuthContext) -> Json<Value> {
    let purged = state.sessions.store().purge_expired().await;
    let remaining = state.sessions.store().len().await;
    tracing::info!(
        purged,
        remaining,
        username = ctx.username.as_deref().unwrap_or(""),
        "Expired sessions purged"
    );
    Json(json!({ "purged": purged, "remaining": remaining }))
}

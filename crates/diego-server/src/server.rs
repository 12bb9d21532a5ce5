use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use diego_auth::Role;
use diego_auth::broker::{IdentityBroker, UaaIdentityBroker, discover_uaa_url};
use diego_auth::config::{AuthConfig, AuthMode, IdentityProviderConfig};
use diego_auth::http::auth_routes;
use diego_auth::jwks::KeyStore;
use diego_auth::middleware::{AuthState, authenticate, rate_limit, require_role};
use diego_auth::rate_limit::{RateLimit, RateLimitTier};
use diego_auth::session::{SessionManager, SessionStore};
use diego_auth::token::TokenVerifier;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::{AppConfig, CorsConfig},
    handlers,
    middleware::{self as app_middleware, RequestId},
};

/// How often expired sessions are swept from the session table.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct DiegoServer {
    addr: SocketAddr,
    app: Router,
    auth: AuthState,
}

pub fn build_app(cfg: &AppConfig, auth: AuthState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    let limits = &cfg.auth.rate_limiting;

    // Login, logout, me and refresh, with their own rate limits and CSRF layer
    let auth_api = auth_routes(auth.clone(), limits);

    let viewer_routes = Router::new()
        .route("/identity", get(handlers::identity))
        .route_layer(middleware::from_fn_with_state(
            RateLimit::new(RateLimitTier::Default, limits),
            rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(Role::Viewer, require_role));

    let operator_routes = Router::new()
        .route("/sessions/purge", post(handlers::purge_sessions))
        .route_layer(middleware::from_fn_with_state(
            RateLimit::new(RateLimitTier::Write, limits),
            rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(Role::Operator, require_role));

    // authenticate runs first, then role gating, then per-user rate limits
    let protected = viewer_routes
        .merge(operator_routes)
        .route_layer(middleware::from_fn_with_state(auth.clone(), authenticate))
        .with_state(auth);

    let api_v1 = Router::new()
        .route("/health", get(handlers::health))
        .merge(auth_api.clone())
        .merge(protected);

    Router::new()
        .nest("/api/v1", api_v1)
        // Legacy alias for the auth endpoints
        .nest("/api", auth_api)
        // Middleware stack, outermost last: body limit, request id, trace, cors
        .layer(cors_layer(&cfg.cors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %app_middleware::sanitize_path(req.uri().path()),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// CORS for the configured origins only, with credentials.
pub fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        tracing::warn!("No CORS origins configured, cross-origin requests are blocked");
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
        ])
}

/// Builds the auth state: identity provider, session table and, when the
/// signing keys can be loaded, bearer token verification.
///
/// Failures here degrade the service instead of stopping it. Without a key
/// set bearer tokens are refused; without an identity provider logins fail.
pub async fn build_auth_state(cfg: &AuthConfig) -> AuthState {
    if cfg.mode == AuthMode::Disabled {
        tracing::warn!("Authentication is disabled, every request is authorized");
    }

    let uaa_url = resolve_uaa_url(&cfg.identity_provider).await;

    let broker: Option<Arc<dyn IdentityBroker>> = uaa_url.as_deref().and_then(|url| {
        match UaaIdentityBroker::new(url, &cfg.identity_provider) {
            Ok(broker) => Some(Arc::new(broker) as Arc<dyn IdentityBroker>),
            Err(e) => {
                tracing::warn!(error = %e, "Identity provider unusable, logins will fail");
                None
            }
        }
    });

    let store = Arc::new(SessionStore::new(cfg.session.clone()));
    let mut state = AuthState::new(cfg.mode, SessionManager::new(store, broker))
        .with_cookie_config(cfg.cookie.clone());

    if !cfg.cookie.secure {
        tracing::warn!("Session cookies are not marked Secure");
    }

    if let Some(url) = uaa_url {
        match KeyStore::initialize(&url, cfg.key_store.clone()).await {
            Ok(keys) => state = state.with_verifier(TokenVerifier::new(keys)),
            Err(e) => tracing::warn!(
                error = %e,
                uaa_url = %url,
                "Signing keys unavailable, bearer token authentication disabled"
            ),
        }
    }

    state
}

async fn resolve_uaa_url(cfg: &IdentityProviderConfig) -> Option<String> {
    if let Some(url) = cfg.uaa_url.as_deref().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    let cf_api = cfg.cf_api_url.as_deref().filter(|u| !u.is_empty());
    let Some(cf_api) = cf_api else {
        tracing::warn!("No identity provider configured, only anonymous access is possible");
        return None;
    };
    match discover_uaa_url(cf_api, cfg).await {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(error = %e, cf_api_url = %cf_api, "Identity provider discovery failed");
            None
        }
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    auth: Option<AuthState>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            auth: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses a prepared auth state instead of building one from the config.
    pub fn with_auth_state(mut self, auth: AuthState) -> Self {
        self.auth = Some(auth);
        self
    }

    pub async fn build(self) -> DiegoServer {
        let auth = match self.auth {
            Some(auth) => auth,
            None => build_auth_state(&self.config.auth).await,
        };
        tracing::info!(
            mode = %auth.mode,
            bearer = auth.verifier.is_some(),
            "Authentication configured"
        );
        let app = build_app(&self.config, auth.clone());

        DiegoServer {
            addr: self.addr,
            app,
            auth,
        }
    }
}

impl DiegoServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let purger = spawn_session_purger(self.auth.clone());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        purger.abort();
        Ok(())
    }
}

fn spawn_session_purger(auth: AuthState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let purged = auth.sessions.store().purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired sessions purged");
            }
        }
    })
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

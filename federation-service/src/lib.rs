pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{DeploymentMode, FederationConfig};
use crate::middleware::auth::bearer_auth_middleware;
use crate::services::{
    ContentAccessBroker, DocumentStore, FederationSyncEngine, Notifier, SessionPolicy,
    SessionStore, SessionTokenManager, TenantRegistry, TokenCodec,
};

#[derive(Clone)]
pub struct AppState {
    pub config: FederationConfig,
    pub docs: Arc<DocumentStore>,
    pub codec: TokenCodec,
    pub sessions: SessionTokenManager,
    pub broker: ContentAccessBroker,
    pub sync: Arc<FederationSyncEngine>,
    pub registry: TenantRegistry,
}

impl AppState {
    /// Wire the services onto injected stores. Used by `main` and by the
    /// integration tests.
    pub fn build(
        config: FederationConfig,
        docs: Arc<DocumentStore>,
        session_store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let codec = TokenCodec::new(&config.jwt.secret);
        let sessions = SessionTokenManager::new(
            docs.clone(),
            session_store,
            codec.clone(),
            notifier,
            SessionPolicy::from_config(&config),
            matches!(config.mode, DeploymentMode::Hub),
        );
        let broker = ContentAccessBroker::new(
            docs.clone(),
            codec.clone(),
            Duration::minutes(config.auth.contents_token_expiry_minutes),
        );
        let sync = Arc::new(FederationSyncEngine::new(
            docs.clone(),
            config.sync.tie_break,
            config.sync.max_bundle_records,
            &config.service_version,
            matches!(config.mode, DeploymentMode::Hub),
        ));
        let registry = TenantRegistry::new(docs.clone());

        Self {
            config,
            docs,
            codec,
            sessions,
            broker,
            sync,
            registry,
        }
    }
}

pub fn build_router(
    state: AppState,
    login_rate_limiter: IpRateLimiter,
    ip_rate_limiter: IpRateLimiter,
) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    // Login-shaped actions get their own, much tighter, IP limit.
    let auth_post = Router::new()
        .route("/api/auth/:action", post(handlers::auth::post_handler))
        .route_layer(from_fn_with_state(
            login_rate_limiter,
            ip_rate_limit_middleware,
        ));
    let auth_rest = Router::new().route(
        "/api/auth/:action",
        get(handlers::auth::get_handler).patch(handlers::auth::patch_handler),
    );

    let mut tenant_routes = Router::new()
        .route("/api/tenants", get(handlers::tenant::list))
        .route("/api/tenants/:id", get(handlers::tenant::get));
    if state.config.security.restful_full_access {
        tenant_routes = tenant_routes
            .route("/api/tenants", post(handlers::tenant::create))
            .route(
                "/api/tenants/:id",
                axum::routing::patch(handlers::tenant::update).delete(handlers::tenant::delete),
            );
    }

    // User-facing routes share the bearer-token middleware. Sync exchanges
    // authenticate with the satellite tenant token instead, and the system
    // routes are public.
    let user_facing = Router::new()
        .merge(auth_post)
        .merge(auth_rest)
        .route("/api/contents/token", get(handlers::content::issue_token))
        .route("/api/contents/:id", get(handlers::content::fetch))
        .merge(tenant_routes)
        .layer(from_fn_with_state(state.clone(), bearer_auth_middleware));

    Router::new()
        .merge(user_facing)
        .route(
            "/api/sync",
            post(handlers::sync::export).patch(handlers::sync::exchange),
        )
        .route("/api/systems/:action", get(handlers::system::get_handler))
        .layer(from_fn_with_state(ip_rate_limiter, ip_rate_limit_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

use federation_service::{
    build_router,
    config::{DeploymentMode, FederationConfig},
    services::{InMemorySessionStore, SatelliteSyncClient, TracingNotifier},
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = FederationConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        mode = ?config.mode,
        "Starting federation service"
    );

    let docs = Arc::new(federation_service::services::DocumentStore::new());
    let session_store = Arc::new(InMemorySessionStore::new());
    let notifier = Arc::new(TracingNotifier);

    let state = AppState::build(config.clone(), docs, session_store, notifier);

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login and Global IP");

    // A satellite drives the exchange loop against its hub.
    if let DeploymentMode::Satellite {
        hub_url,
        tenant_id,
        tenant_token,
    } = &config.mode
    {
        let client = SatelliteSyncClient::new(
            hub_url,
            tenant_id,
            tenant_token,
            &config.service_version,
            state.sync.clone(),
        )?;
        let interval = std::time::Duration::from_secs(config.sync.interval_seconds);
        tracing::info!(%hub_url, %tenant_id, ?interval, "Starting satellite sync loop");
        tokio::spawn(client.run(interval));
    }

    let app = build_router(state, login_rate_limiter, ip_rate_limiter);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

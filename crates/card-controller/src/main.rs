//! Card Controller
//!
//! Single-process server for live meeting status cards.
//!
//! # Servers
//!
//! - HTTP API and meeting channel WebSockets (default: 0.0.0.0:8000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the in-memory store and the channel registry
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Start API server, then mark ready
//! 6. Wait for shutdown signal, drain channels, stop servers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use card_controller::actors::{ActorMetrics, MeetingChannelRegistry};
use card_controller::config::Config;
use card_controller::observability::{health_router, init_metrics_recorder, HealthState};
use card_controller::routes::{build_routes, AppState};
use card_controller::store::InMemoryStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each channel gets to stop during shutdown.
const CHANNEL_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "card_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Card Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        broadcast_cooldown_ms = config.broadcast_cooldown_ms,
        simulation_interval_seconds = config.simulation_interval_seconds,
        connection_buffer = config.connection_buffer,
        "Configuration loaded successfully"
    );

    // Must happen before any metric is recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let registry = MeetingChannelRegistry::new(
        config.instance_id.clone(),
        config.channel_settings(),
        ActorMetrics::new(),
    );
    info!("Channel registry initialized");

    // Health server (liveness, readiness, /metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // API server
    let api_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let state = Arc::new(AppState {
        store: InMemoryStore::new(),
        registry: registry.clone(),
        config,
    });
    let app = build_routes(state);

    let api_listener = tokio::net::TcpListener::bind(api_addr).await.map_err(|e| {
        error!(error = %e, addr = %api_addr, "Failed to bind API server");
        format!("Failed to bind API server to {api_addr}: {e}")
    })?;

    let api_shutdown_token = shutdown_token.child_token();
    let api_task = tokio::spawn(async move {
        info!(addr = %api_addr, "Card Controller listening");
        let server = axum::serve(api_listener, app).with_graceful_shutdown(async move {
            api_shutdown_token.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });

    health_state.set_ready();
    info!("Card Controller ready");

    shutdown_signal().await;

    // Stop receiving traffic before draining
    health_state.set_not_ready();

    // Cancelling the channels closes every open WebSocket
    if let Err(e) = registry.shutdown(CHANNEL_SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Channel registry shutdown failed");
    }

    shutdown_token.cancel();

    if let Err(e) = api_task.await {
        warn!(error = %e, "API server task ended abnormally");
    }
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("Card Controller shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

//! Delta Stream Proxy Binary
//!
//! Starts the market data stream proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin delta-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Credentials (optional as a pair; setting only one is an error)
//! - `DELTA_API_KEY`: Delta Exchange API key
//! - `DELTA_API_SECRET`: Delta Exchange API secret
//!
//! ## Optional
//! - `DELTA_ENV`: PRODUCTION | TESTNET (default: PRODUCTION)
//! - `STREAM_PROXY_HTTP_PORT`: Streaming HTTP port (default: 3001)
//! - `STREAM_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `STREAM_PROXY_MOCK_FALLBACK`: Serve synthetic data without credentials
//!   (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: delta-stream-proxy)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use delta_stream_proxy::infrastructure::telemetry;
use delta_stream_proxy::{
    AppState, Broadcaster, ConnectionDeduplicator, HealthServer, HealthServerState,
    HeartbeatConfig, ProxyConfig, ReconnectConfig, SecurityGate, SecurityGateConfig,
    SessionRegistry, SubscriptionRegistry, UpstreamEvent, UpstreamOptions, init_metrics,
    stream_router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Depth of the upstream event channel feeding the broadcaster.
const EVENT_BUFFER: usize = 1024;

/// How often idle rate limit buckets are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Delta Stream Proxy");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Subscription interest and connected sessions
    let registry = Arc::new(SubscriptionRegistry::new());
    let sessions = Arc::new(SessionRegistry::new());

    // Security gate for the streaming endpoints
    let gate = Arc::new(SecurityGate::new(SecurityGateConfig {
        allowed_origins: config.security.allowed_origins.clone(),
        rate_limit_max: config.security.rate_limit_max,
        rate_limit_window: config.security.rate_limit_window,
        max_sessions: config.security.max_sessions,
        bucket_ttl: config.security.bucket_ttl,
    }));

    // Upstream connection, shared by all sessions
    let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(EVENT_BUFFER);
    let dedup = Arc::new(ConnectionDeduplicator::new(
        UpstreamOptions {
            url: config.upstream_url(),
            credentials: config.credentials.clone(),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            mock_fallback: config.stream.mock_fallback,
        },
        Arc::clone(&registry),
        event_tx,
        shutdown_token.clone(),
    ));

    // Spawn the broadcaster bridging upstream events to session queues
    let broadcaster = Broadcaster::new(
        Arc::clone(&sessions),
        Arc::clone(&registry),
        shutdown_token.clone(),
    );
    tokio::spawn(broadcaster.run(event_rx));

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&dedup),
        Arc::clone(&sessions),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn rate limit bucket sweeper
    let sweep_gate = Arc::clone(&gate);
    let sweep_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = sweep_cancel.cancelled() => break,
                _ = interval.tick() => sweep_gate.sweep_idle(),
            }
        }
    });

    // Streaming HTTP server
    let app_state = AppState::new(
        sessions,
        registry,
        dedup,
        gate,
        config.stream.queue_capacity,
        shutdown_token.clone(),
    );
    let app = stream_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Streaming server listening");

    let serve_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(serve_cancel.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "Streaming server error");
        }
        tracing::info!("Streaming server stopped");
    });

    tracing::info!("Stream proxy ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Stream proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        max_sessions = config.security.max_sessions,
        queue_capacity = config.stream.queue_capacity,
        mock_fallback = config.stream.mock_fallback,
        credentials = config.credentials.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream_url(),
        "Upstream endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

//! Signaling Service
//!
//! Relays WebRTC negotiation between clients and the media engine and keeps
//! session membership in Redis.
//!
//! # Servers
//!
//! - gRPC server for signaling streams and session RPCs (default: 0.0.0.0:50051)
//! - HTTP server for health, metrics and webhooks (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Connect to Redis
//! 4. Build the WebRTC negotiator factory
//! 5. Bind both listeners, then serve until SIGINT/SIGTERM

#![warn(clippy::pedantic)]

use std::sync::Arc;

use common::secret::{redact_url, ExposeSecret};
use signaling_service::config::{Config, LogFormat};
use signaling_service::media::RtcNegotiatorFactory;
use signaling_service::observability::metrics::init_metrics_recorder;
use signaling_service::server::{ServerOptions, SignalingServer};
use signaling_service::store::{RedisSessionStore, SessionStore};
use signaling_service::token::TokenIssuer;
use signaling_service::webhook::WebhookReceiver;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config first: it decides the log format
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "signaling_service=info,sig=info,tower_http=info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting Signaling Service");
    info!(
        redis_url = %redact_url(config.redis_url.expose_secret()),
        grpc_bind_address = %config.grpc_bind_address,
        health_bind_address = %config.health_bind_address,
        session_ttl_seconds = config.session_ttl_seconds,
        peer_ttl_seconds = config.peer_ttl_seconds,
        livekit_enabled = config.livekit.is_some(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    info!("Connecting to Redis...");
    let store = RedisSessionStore::connect(config.redis_url.expose_secret(), config.store_ttl())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    let store = Arc::new(store);
    info!("Redis connection established");

    let negotiators = RtcNegotiatorFactory::new(config.ice_servers.clone()).map_err(|e| {
        error!(error = %e, "Failed to initialize media engine");
        e
    })?;

    let (token_issuer, webhook) = match &config.livekit {
        Some(livekit) => (
            Some(TokenIssuer::new(
                livekit.host.clone(),
                livekit.api_key.clone(),
                livekit.api_secret.clone(),
                config.token_validity(),
            )),
            Some(Arc::new(WebhookReceiver::new(
                livekit.api_key.clone(),
                livekit.api_secret.clone(),
            ))),
        ),
        None => (None, None),
    };

    let server = SignalingServer::new(
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::new(negotiators),
        ServerOptions {
            default_max_peers: config.default_max_peers,
            shutdown_grace_period: config.shutdown_grace_period(),
            token_issuer,
            webhook,
            metrics: Some(prometheus_handle),
        },
    );

    // Bind BEFORE serving to fail fast on bind errors
    let grpc_listener = TcpListener::bind(&config.grpc_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.grpc_bind_address, "Failed to bind gRPC server");
            e
        })?;
    let http_listener = TcpListener::bind(&config.health_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Failed to bind health server");
            e
        })?;
    info!(
        grpc_addr = %config.grpc_bind_address,
        health_addr = %config.health_bind_address,
        "Listeners bound"
    );

    let result = server
        .serve_with_listeners(grpc_listener, http_listener, async {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
        })
        .await;

    store.close().await;

    if let Err(e) = result {
        error!(error = %e, "Signaling server failed");
        return Err(e.into());
    }

    info!("Signaling Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

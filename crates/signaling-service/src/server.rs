//! Server lifecycle: gRPC and HTTP listeners, readiness, graceful shutdown.
//!
//! Shutdown runs in three steps. Readiness drops and both listeners stop
//! accepting. Open signaling streams then get the grace period to finish on
//! their own. Whatever is still open afterwards is cancelled through the
//! connections token.

use crate::config::{DEFAULT_MAX_PEERS, DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS};
use crate::errors::SignalingError;
use crate::grpc::SignalingGrpcService;
use crate::media::NegotiatorFactory;
use crate::observability::{health_router, HealthState};
use crate::store::SessionStore;
use crate::token::TokenIssuer;
use crate::webhook::{webhook_router, WebhookReceiver};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use proto_gen::signaling::signaling_service_server::SignalingServiceServer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// How long the gRPC server gets to drain after streams were cancelled.
const CANCELLED_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables and optional parts of the server.
pub struct ServerOptions {
    pub default_max_peers: u32,
    pub shutdown_grace_period: Duration,
    pub token_issuer: Option<TokenIssuer>,
    pub webhook: Option<Arc<WebhookReceiver>>,
    /// Serves `/metrics` when present.
    pub metrics: Option<PrometheusHandle>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            default_max_peers: DEFAULT_MAX_PEERS,
            shutdown_grace_period: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS),
            token_issuer: None,
            webhook: None,
            metrics: None,
        }
    }
}

/// The signaling relay process.
pub struct SignalingServer {
    store: Arc<dyn SessionStore>,
    negotiators: Arc<dyn NegotiatorFactory>,
    options: ServerOptions,
    health: Arc<HealthState>,
    connections_token: CancellationToken,
}

impl SignalingServer {
    pub fn new(
        store: Arc<dyn SessionStore>,
        negotiators: Arc<dyn NegotiatorFactory>,
        options: ServerOptions,
    ) -> Self {
        Self {
            store,
            negotiators,
            options,
            health: Arc::new(HealthState::new()),
            connections_token: CancellationToken::new(),
        }
    }

    /// Readiness and liveness flags, shared with the health router.
    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Parent token of every signaling stream.
    #[must_use]
    pub fn connections_token(&self) -> CancellationToken {
        self.connections_token.clone()
    }

    /// Health, metrics and webhook routes.
    pub fn http_router(&self) -> Router {
        let mut router = health_router(Arc::clone(&self.health));

        if let Some(handle) = self.options.metrics.clone() {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        if let Some(receiver) = &self.options.webhook {
            router = router.merge(webhook_router(Arc::clone(receiver)));
        }

        router.layer(TraceLayer::new_for_http())
    }

    fn grpc_service(&self) -> SignalingGrpcService {
        let service = SignalingGrpcService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.negotiators),
            self.connections_token.clone(),
            self.options.default_max_peers,
        );
        match self.options.token_issuer.clone() {
            Some(issuer) => service.with_token_issuer(issuer),
            None => service,
        }
    }

    /// Serve on already-bound listeners until `shutdown` resolves, then shut
    /// down gracefully.
    ///
    /// # Errors
    ///
    /// `Transport` if either server fails.
    pub async fn serve_with_listeners<F>(
        self,
        grpc_listener: TcpListener,
        http_listener: TcpListener,
        shutdown: F,
    ) -> Result<(), SignalingError>
    where
        F: Future<Output = ()> + Send,
    {
        let stop_accepting = CancellationToken::new();

        let grpc_stop = stop_accepting.clone();
        let grpc_server = tonic::transport::Server::builder()
            .add_service(SignalingServiceServer::new(self.grpc_service()))
            .serve_with_incoming_shutdown(TcpListenerStream::new(grpc_listener), async move {
                grpc_stop.cancelled().await;
            });
        let mut grpc_task: JoinHandle<Result<(), SignalingError>> = tokio::spawn(async move {
            grpc_server
                .await
                .map_err(|e| SignalingError::Transport(e.to_string()))
        });

        let http_stop = stop_accepting.clone();
        let http_server = axum::serve(http_listener, self.http_router()).with_graceful_shutdown(
            async move {
                http_stop.cancelled().await;
            },
        );
        let http_task: JoinHandle<Result<(), SignalingError>> = tokio::spawn(async move {
            http_server
                .await
                .map_err(|e| SignalingError::Transport(e.to_string()))
        });

        self.health.set_ready();
        info!(target: "sig.server", "Signaling server ready");

        // A server dying on its own also ends the wait
        let early_exit = tokio::select! {
            () = shutdown => None,
            result = &mut grpc_task => Some(result),
        };

        self.health.set_not_ready();
        stop_accepting.cancel();

        let grpc_result = match early_exit {
            Some(result) => {
                error!(target: "sig.server", "gRPC server exited unexpectedly");
                self.connections_token.cancel();
                result
            }
            None => {
                info!(
                    target: "sig.server",
                    grace_period_secs = self.options.shutdown_grace_period.as_secs(),
                    "Shutdown started, draining signaling streams"
                );
                self.drain(&mut grpc_task).await
            }
        };

        let http_result = http_task.await;

        flatten(grpc_result)?;
        flatten(http_result)?;
        info!(target: "sig.server", "Signaling server stopped");
        Ok(())
    }

    async fn drain(
        &self,
        grpc_task: &mut JoinHandle<Result<(), SignalingError>>,
    ) -> Result<Result<(), SignalingError>, tokio::task::JoinError> {
        if let Ok(result) =
            tokio::time::timeout(self.options.shutdown_grace_period, &mut *grpc_task).await
        {
            self.connections_token.cancel();
            return result;
        }

        warn!(target: "sig.server", "Grace period elapsed, cancelling open streams");
        self.connections_token.cancel();

        match tokio::time::timeout(CANCELLED_DRAIN_TIMEOUT, &mut *grpc_task).await {
            Ok(result) => result,
            Err(_) => {
                warn!(target: "sig.server", "gRPC server did not drain, aborting");
                grpc_task.abort();
                Ok(Ok(()))
            }
        }
    }
}

fn flatten(
    result: Result<Result<(), SignalingError>, tokio::task::JoinError>,
) -> Result<(), SignalingError> {
    result.map_err(|e| SignalingError::Internal(format!("server task failed: {e}")))?
}

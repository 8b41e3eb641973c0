//! Health endpoints for the signaling relay.
//!
//! - `GET /healthz` - Liveness probe (is the process running?)
//! - `GET /livez` - Alias of `/healthz`
//! - `GET /readyz` - Readiness probe (are new streams accepted?)
//!
//! The `/metrics` endpoint is mounted next to these by `main`.
//!
//! # Health State
//!
//! `HealthState` is owned by the server and flipped only at lifecycle
//! points: ready once the listeners are bound, not ready as soon as
//! shutdown begins so load balancers drain the instance during the grace
//! period.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(liveness_handler))
        .route("/livez", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    probe_status(state.is_live())
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    probe_status(state.is_ready())
}

fn probe_status(up: bool) -> StatusCode {
    if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn status_of(router: Router, path: &str) -> StatusCode {
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn test_new_state_is_live_but_not_ready() {
        let state = HealthState::default();
        assert!(state.is_live());
        assert!(!state.is_ready(), "streams are refused until the listeners are bound");
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new();

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_endpoints_return_200() {
        let state = Arc::new(HealthState::new());
        assert_eq!(status_of(health_router(state.clone()), "/healthz").await, StatusCode::OK);
        assert_eq!(status_of(health_router(state), "/livez").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            status_of(health_router(state.clone()), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(status_of(health_router(state.clone()), "/readyz").await, StatusCode::OK);

        state.set_not_ready();
        assert_eq!(
            status_of(health_router(state), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let state = Arc::new(HealthState::new());
        assert_eq!(status_of(health_router(state), "/health").await, StatusCode::NOT_FOUND);
    }
}

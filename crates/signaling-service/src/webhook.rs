//! Media server webhook receiver.
//!
//! `POST /webhook/livekit` accepts room and participant events. Each
//! request carries a JWT in `Authorization`, signed with the API secret,
//! whose `sha256` claim is the base64 SHA-256 digest of the body. Verified
//! events are logged once; redeliveries are counted as duplicates.

use crate::observability::metrics;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Path the media server posts to.
pub const WEBHOOK_PATH: &str = "/webhook/livekit";

/// How many recent events are remembered for deduplication.
pub const DEDUP_WINDOW: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing authorization header")]
    MissingAuthorization,

    #[error("invalid webhook token: {0}")]
    InvalidToken(String),

    #[error("body digest does not match token")]
    DigestMismatch,

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl WebhookError {
    fn status(&self) -> StatusCode {
        match self {
            WebhookError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookClaims {
    #[serde(default)]
    sha256: String,
}

#[derive(Debug, Default, Deserialize)]
struct NamedRoom {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Participant {
    #[serde(default)]
    identity: String,
}

/// The event fields the receiver acts on; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    room: Option<NamedRoom>,
    #[serde(default)]
    participant: Option<Participant>,
}

impl WebhookEvent {
    pub fn room_name(&self) -> &str {
        self.room.as_ref().map_or("", |r| r.name.as_str())
    }

    pub fn identity(&self) -> &str {
        self.participant.as_ref().map_or("", |p| p.identity.as_str())
    }

    /// Bounded metric label for the event name.
    fn label(&self) -> &'static str {
        match self.event.as_str() {
            "participant_joined" => "participant_joined",
            "participant_left" => "participant_left",
            "track_published" => "track_published",
            "room_finished" => "room_finished",
            _ => "other",
        }
    }

    fn dedup_key(&self) -> String {
        if self.id.is_empty() {
            format!("{}|{}|{}", self.event, self.room_name(), self.identity())
        } else {
            self.id.clone()
        }
    }
}

/// FIFO-bounded set of recently seen event keys.
#[derive(Debug, Default)]
struct RecentEvents {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentEvents {
    /// Returns false if `key` is already in the window.
    fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// Verifies and records webhook deliveries for one API key pair.
pub struct WebhookReceiver {
    api_key: String,
    api_secret: SecretString,
    recent: Mutex<RecentEvents>,
}

impl WebhookReceiver {
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            recent: Mutex::new(RecentEvents::default()),
        }
    }

    /// Check the token signature, issuer and body digest, then parse the event.
    pub fn verify(&self, authorization: &str, body: &[u8]) -> Result<WebhookEvent, WebhookError> {
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if token.is_empty() {
            return Err(WebhookError::MissingAuthorization);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = decode::<WebhookClaims>(
            token,
            &DecodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| WebhookError::InvalidToken(e.to_string()))?
        .claims;

        let digest = STANDARD.encode(Sha256::digest(body));
        if claims.sha256 != digest {
            return Err(WebhookError::DigestMismatch);
        }

        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedEvent(e.to_string()))
    }

    /// Log a verified event. Returns false for a redelivery.
    pub async fn record(&self, event: &WebhookEvent) -> bool {
        let fresh = self.recent.lock().await.insert(event.dedup_key());
        metrics::record_webhook_event(event.label(), !fresh);
        if !fresh {
            debug!(target: "sig.webhook", event = %event.event, "Duplicate webhook event");
            return false;
        }

        let room = event.room_name();
        let identity = event.identity();
        match event.event.as_str() {
            "participant_joined" => {
                info!(target: "sig.webhook", room, identity, "Participant joined");
            }
            "participant_left" => {
                info!(target: "sig.webhook", room, identity, "Participant left");
            }
            "track_published" => {
                info!(target: "sig.webhook", room, identity, "Track published");
            }
            "room_finished" => info!(target: "sig.webhook", room, "Room finished"),
            other => debug!(target: "sig.webhook", event = other, "Unhandled webhook event"),
        }
        true
    }
}

/// Router serving [`WEBHOOK_PATH`].
pub fn webhook_router(receiver: Arc<WebhookReceiver>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .with_state(receiver)
}

async fn webhook_handler(
    State(receiver): State<Arc<WebhookReceiver>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match receiver.verify(authorization, &body) {
        Ok(event) => {
            receiver.record(&event).await;
            StatusCode::OK
        }
        Err(e) => {
            warn!(target: "sig.webhook", error = %e, "Rejected webhook");
            e.status()
        }
    }
}

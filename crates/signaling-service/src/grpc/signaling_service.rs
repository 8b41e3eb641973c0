//! `SignalingService` gRPC implementation.
//!
//! `Signal` hosts one [`SignalingSession`] per bidirectional stream. The
//! unary RPCs cover session administration and, when a managed media server
//! is configured, join tokens for it.

use crate::errors::{SignalingError, StoreError};
use crate::media::NegotiatorFactory;
use crate::models::Session;
use crate::permissions::permissions_for_role;
use crate::room_code::generate_room_code;
use crate::signaling::SignalingSession;
use crate::store::SessionStore;
use crate::token::TokenIssuer;
use proto_gen::signaling::signaling_service_server::SignalingService;
use proto_gen::signaling::{
    CreateSessionReply, CreateSessionRequest, JoinSessionReply, JoinSessionRequest,
    ResolveRoomCodeReply, ResolveRoomCodeRequest, SessionInfo, SignalReply, SignalRequest,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Replies buffered per stream before the session's sends wait on the client.
pub const OUTBOUND_BUFFER: usize = 64;

/// Room-code draws before `CreateSession` gives up.
const ROOM_CODE_ATTEMPTS: usize = 5;

/// Maximum accepted length of client-supplied ids.
const MAX_ID_LENGTH: usize = 255;

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            room_code: session.room_code,
            created_at: session.created_at.timestamp(),
            max_peers: session.max_peers,
            status: session.status.as_str().to_string(),
        }
    }
}

/// Signaling gRPC service.
pub struct SignalingGrpcService {
    store: Arc<dyn SessionStore>,
    negotiators: Arc<dyn NegotiatorFactory>,
    tokens: Option<TokenIssuer>,
    connections_token: CancellationToken,
    default_max_peers: u32,
}

impl SignalingGrpcService {
    /// `connections_token` is the parent of every stream's token; cancelling
    /// it ends all open streams.
    pub fn new(
        store: Arc<dyn SessionStore>,
        negotiators: Arc<dyn NegotiatorFactory>,
        connections_token: CancellationToken,
        default_max_peers: u32,
    ) -> Self {
        Self {
            store,
            negotiators,
            tokens: None,
            connections_token,
            default_max_peers,
        }
    }

    /// Enable `JoinSession`.
    #[must_use]
    pub fn with_token_issuer(mut self, tokens: TokenIssuer) -> Self {
        self.tokens = Some(tokens);
        self
    }

    async fn create_with_fresh_code(&self, max_peers: u32) -> Result<Session, SignalingError> {
        for attempt in 1..=ROOM_CODE_ATTEMPTS {
            let code = generate_room_code()?;
            match self.store.get_session_by_room_code(&code).await {
                Ok(_) => {
                    debug!(target: "sig.grpc", attempt, "Room code collision, drawing again");
                    continue;
                }
                Err(StoreError::InvalidRoomCode) => {}
                Err(e) => return Err(e.into()),
            }

            let session = Session::new(Uuid::new_v4().to_string(), code, max_peers);
            self.store.create_session(&session).await?;
            return Ok(session);
        }

        Err(SignalingError::Internal(format!(
            "no free room code after {ROOM_CODE_ATTEMPTS} attempts"
        )))
    }
}

fn require_id(value: &str, field: &str) -> Result<(), SignalingError> {
    if value.is_empty() {
        return Err(SignalingError::InvalidArgument(format!("{field} is required")));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(SignalingError::InvalidArgument(format!("{field} is too long")));
    }
    Ok(())
}

/// Tell a still-connected client why its stream ended.
///
/// Returns whether the status reached the outbound stream.
async fn report_cancellation(
    tx: &mpsc::Sender<Result<SignalReply, Status>>,
    error: SignalingError,
) -> bool {
    if tx.send(Err(Status::from(error))).await.is_err() {
        debug!(target: "sig.grpc", "Client stream closed before cancellation status was sent");
        return false;
    }
    true
}

#[tonic::async_trait]
impl SignalingService for SignalingGrpcService {
    type SignalStream = ReceiverStream<Result<SignalReply, Status>>;

    #[instrument(skip_all, name = "sig.grpc.signal")]
    async fn signal(
        &self,
        request: Request<Streaming<SignalRequest>>,
    ) -> Result<Response<Self::SignalStream>, Status> {
        if self.connections_token.is_cancelled() {
            return Err(Status::unavailable("Server is shutting down"));
        }

        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let session = SignalingSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.negotiators),
            tx.clone(),
            self.connections_token.child_token(),
        );

        tokio::spawn(async move {
            if let Err(e @ SignalingError::Cancelled) = session.run(inbound).await {
                report_cancellation(&tx, e).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    #[instrument(skip_all, name = "sig.grpc.join_session")]
    async fn join_session(
        &self,
        request: Request<JoinSessionRequest>,
    ) -> Result<Response<JoinSessionReply>, Status> {
        let Some(tokens) = &self.tokens else {
            return Err(Status::unimplemented("Media server tokens are not configured"));
        };
        let req = request.into_inner();

        require_id(&req.session_id, "session_id")?;
        require_id(&req.user_id, "user_id")?;
        let grant = permissions_for_role(&req.role)?;

        let session = self.store.get_session(&req.session_id).await?;
        if session.is_closed() {
            return Err(SignalingError::from(StoreError::SessionClosed).into());
        }

        let join = tokens.issue(&session.id, &req.user_id, grant)?;

        info!(
            target: "sig.grpc",
            session_id = %session.id,
            user_id = %req.user_id,
            role = %req.role,
            "Issued join token"
        );

        Ok(Response::new(JoinSessionReply {
            token: join.token,
            livekit_url: join.url,
        }))
    }

    #[instrument(skip_all, name = "sig.grpc.create_session")]
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionReply>, Status> {
        let req = request.into_inner();
        let max_peers = if req.max_peers == 0 {
            self.default_max_peers
        } else {
            req.max_peers
        };

        let session = self.create_with_fresh_code(max_peers).await.map_err(|e| {
            warn!(target: "sig.grpc", error = %e, "Failed to create session");
            Status::from(e)
        })?;

        info!(
            target: "sig.grpc",
            session_id = %session.id,
            room_code = %session.room_code,
            max_peers = session.max_peers,
            "Created session"
        );

        Ok(Response::new(CreateSessionReply {
            session: Some(session.into()),
        }))
    }

    #[instrument(skip_all, name = "sig.grpc.resolve_room_code")]
    async fn resolve_room_code(
        &self,
        request: Request<ResolveRoomCodeRequest>,
    ) -> Result<Response<ResolveRoomCodeReply>, Status> {
        let req = request.into_inner();
        let session = self.store.get_session_by_room_code(&req.room_code).await?;

        Ok(Response::new(ResolveRoomCodeReply {
            session: Some(session.into()),
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_report_cancellation_to_open_stream() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(report_cancellation(&tx, SignalingError::Cancelled).await);

        let status = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Cancelled);
    }

    #[tokio::test]
    async fn test_report_cancellation_after_client_left() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!report_cancellation(&tx, SignalingError::Cancelled).await);
    }

    #[test]
    fn test_session_info_conversion() {
        let mut session = Session::new("s1".to_string(), "ABC123".to_string(), 2);
        session.created_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        session.status = SessionStatus::Closed;

        let info = SessionInfo::from(session);
        assert_eq!(info.id, "s1");
        assert_eq!(info.room_code, "ABC123");
        assert_eq!(info.created_at, 1_704_164_645);
        assert_eq!(info.max_peers, 2);
        assert_eq!(info.status, "closed");
    }

    #[test]
    fn test_require_id() {
        assert!(require_id("s1", "session_id").is_ok());
        assert!(matches!(
            require_id("", "session_id"),
            Err(SignalingError::InvalidArgument(msg)) if msg == "session_id is required"
        ));
        assert!(require_id(&"x".repeat(MAX_ID_LENGTH + 1), "user_id").is_err());
    }
}

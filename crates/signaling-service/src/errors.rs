//! Signaling service error types.
//!
//! Every error carries an [`ErrorKind`] which decides the gRPC status code
//! and the `code` field of in-stream error replies. Internal details are
//! logged server-side but not exposed to clients.

use thiserror::Error;
use tonic::{Code, Status};
use tracing::error;

/// Coarse error classification shared by the store and the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// Wire name used in `SignalError.code`.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Membership store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found")]
    SessionNotFound,

    #[error("peer not found")]
    PeerNotFound,

    #[error("session is closed")]
    SessionClosed,

    #[error("session is at capacity")]
    SessionFull,

    #[error("invalid room code")]
    InvalidRoomCode,

    /// Rejected before reaching the backing store (e.g. zero capacity).
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored record could not be decoded, or a script returned garbage.
    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::SessionNotFound | StoreError::PeerNotFound => ErrorKind::NotFound,
            StoreError::SessionClosed | StoreError::SessionFull => ErrorKind::Conflict,
            StoreError::InvalidRoomCode | StoreError::InvalidSession(_) => ErrorKind::InvalidInput,
            StoreError::StoreUnavailable(_) => ErrorKind::Unavailable,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Service-level error type.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown role {0:?}: must be \"camera\" or \"director\"")]
    UnknownRole(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Join received on a connection that already joined.
    #[error("connection already joined")]
    AlreadyJoined,

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("token signing failed: {0}")]
    TokenSigning(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The inbound stream failed with a transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection was cancelled by server shutdown.
    #[error("connection cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalingError::Store(e) => e.kind(),
            SignalingError::UnknownRole(_) | SignalingError::InvalidArgument(_) => {
                ErrorKind::InvalidInput
            }
            SignalingError::AlreadyJoined => ErrorKind::Conflict,
            SignalingError::Transport(_) | SignalingError::Cancelled => ErrorKind::Unavailable,
            SignalingError::Negotiation(_)
            | SignalingError::TokenSigning(_)
            | SignalingError::Config(_)
            | SignalingError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::Store(StoreError::StoreUnavailable(_)) => {
                "Session store is unavailable, please retry".to_string()
            }
            SignalingError::Store(StoreError::Internal(_))
            | SignalingError::Negotiation(_)
            | SignalingError::TokenSigning(_)
            | SignalingError::Config(_)
            | SignalingError::Internal(_) => "An internal error occurred".to_string(),
            SignalingError::Store(e) => e.to_string(),
            SignalingError::UnknownRole(_)
            | SignalingError::InvalidArgument(_)
            | SignalingError::AlreadyJoined => self.to_string(),
            SignalingError::Transport(_) | SignalingError::Cancelled => {
                "Connection closed".to_string()
            }
        }
    }

    fn status_code(&self) -> Code {
        match self {
            SignalingError::Store(StoreError::SessionFull) => Code::ResourceExhausted,
            SignalingError::Cancelled => Code::Cancelled,
            _ => match self.kind() {
                ErrorKind::NotFound => Code::NotFound,
                ErrorKind::Conflict => Code::FailedPrecondition,
                ErrorKind::InvalidInput => Code::InvalidArgument,
                ErrorKind::Unavailable => Code::Unavailable,
                ErrorKind::Internal => Code::Internal,
            },
        }
    }
}

impl From<SignalingError> for Status {
    fn from(err: SignalingError) -> Self {
        if err.kind() == ErrorKind::Internal {
            error!(target: "sig.errors", error = %err, "Internal error");
        }
        Status::new(err.status_code(), err.client_message())
    }
}

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        SignalingError::from(err).into()
    }
}

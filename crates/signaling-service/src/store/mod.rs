//! Session and peer membership store.
//!
//! [`SessionStore`] is the seam between the relay and the backing key-value
//! store. [`RedisSessionStore`] is the production implementation; tests use
//! the in-memory mock from `signaling-test-utils`.
//!
//! Every multi-key mutation is applied as one atomic unit, and no store state
//! is cached in-process: two relay instances sharing a Redis see the same
//! membership.

pub mod lua_scripts;
pub mod redis;

pub use self::redis::RedisSessionStore;

use crate::errors::StoreError;
use crate::models::{Peer, PeerStatus, Session};
use async_trait::async_trait;
use std::time::Duration;

/// Default session record lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default peer record lifetime.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(60 * 60);

/// Record lifetimes applied by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTtl {
    /// Session record, room-code mapping and peer-set.
    pub session: Duration,
    /// Peer records, refreshed on every status update.
    pub peer: Duration,
}

impl Default for StoreTtl {
    fn default() -> Self {
        Self {
            session: DEFAULT_SESSION_TTL,
            peer: DEFAULT_PEER_TTL,
        }
    }
}

/// Membership store operations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write the session record, its room-code mapping and its active-index
    /// entry as one unit.
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// `SessionNotFound` if absent or expired.
    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError>;

    /// `InvalidRoomCode` if the code is malformed, unmapped, or belongs to a
    /// closed session.
    async fn get_session_by_room_code(&self, room_code: &str) -> Result<Session, StoreError>;

    /// Mark the session closed and unmap its room code. Idempotent.
    async fn close_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Remove the session, its peer-set, its room-code mapping, its
    /// active-index entry and all of its peer records.
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Ids of active sessions whose records still resolve.
    async fn list_active_sessions(&self) -> Result<Vec<String>, StoreError>;

    /// Register a peer, enforcing session status and capacity atomically with
    /// the insert.
    async fn add_peer(&self, peer: &Peer) -> Result<(), StoreError>;

    /// `PeerNotFound` if absent or expired.
    async fn get_peer(&self, peer_id: &str) -> Result<Peer, StoreError>;

    /// Delete the peer record and drop it from its session's peer-set.
    async fn remove_peer(&self, peer_id: &str) -> Result<(), StoreError>;

    /// All resolvable peers of a session; expired ids are skipped.
    async fn list_session_peers(&self, session_id: &str) -> Result<Vec<Peer>, StoreError>;

    /// Set the status and refresh the peer TTL. Idempotent.
    async fn update_peer_status(&self, peer_id: &str, status: PeerStatus)
        -> Result<(), StoreError>;

    /// `StoreUnavailable` if the backing store cannot be reached.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the connection. Later calls fail with `StoreUnavailable`.
    async fn close(&self);
}

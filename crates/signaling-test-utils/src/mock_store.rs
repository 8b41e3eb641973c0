//! In-memory membership store for signaling tests.
//!
//! Mirrors the Redis key layout one map per key family, including per-key
//! expiry, so behavior around TTLs, stale peer-set members and room-code
//! ownership matches the real store. Expiry uses `tokio::time::Instant`, so
//! tests can pause and advance time.
//!
//! # Example
//!
//! ```rust,ignore
//! use signaling_test_utils::{MockSessionStore, TestSession};
//!
//! let store = MockSessionStore::new()
//!     .with_session(TestSession::new("s1").with_room_code("ABC123").build());
//!
//! store.set_unavailable(true);
//! assert!(store.get_session("s1").await.is_err());
//! ```

use async_trait::async_trait;
use signaling_service::errors::StoreError;
use signaling_service::models::{Peer, PeerStatus, Session, SessionStatus};
use signaling_service::room_code::normalize_room_code;
use signaling_service::store::{SessionStore, StoreTtl};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Mock membership store.
#[derive(Debug, Clone)]
pub struct MockSessionStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    ttl: StoreTtl,
    sessions: HashMap<String, Expiring<Session>>,
    room_codes: HashMap<String, Expiring<String>>,
    peer_sets: HashMap<String, Expiring<HashSet<String>>>,
    peers: HashMap<String, Expiring<Peer>>,
    active: HashSet<String>,
    unavailable: bool,
    closed: bool,
    calls: Vec<&'static str>,
}

impl MockStoreInner {
    fn check(&mut self, operation: &'static str) -> Result<Instant, StoreError> {
        self.calls.push(operation);
        if self.unavailable || self.closed {
            return Err(StoreError::StoreUnavailable(
                "mock store unavailable".to_string(),
            ));
        }
        Ok(Instant::now())
    }

    fn session(&self, id: &str, now: Instant) -> Option<&Session> {
        self.sessions
            .get(id)
            .filter(|e| e.live(now))
            .map(|e| &e.value)
    }

    fn peer(&self, id: &str, now: Instant) -> Option<&Peer> {
        self.peers.get(id).filter(|e| e.live(now)).map(|e| &e.value)
    }

    fn session_expiry(&self, id: &str, now: Instant) -> Option<Instant> {
        self.sessions
            .get(id)
            .filter(|e| e.live(now))
            .map(|e| e.expires_at)
    }

    fn peer_set(&self, session_id: &str, now: Instant) -> HashSet<String> {
        self.peer_sets
            .get(session_id)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone())
            .unwrap_or_default()
    }
}

impl Default for MockSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionStore {
    /// Create an empty store with default TTLs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(StoreTtl::default())
    }

    /// Create an empty store with the given TTLs.
    #[must_use]
    pub fn with_ttl(ttl: StoreTtl) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockStoreInner {
                ttl,
                ..MockStoreInner::default()
            })),
        }
    }

    /// Seed a session as if `create_session` had run.
    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let expires_at = Instant::now() + inner.ttl.session;
            if !session.is_closed() {
                inner.room_codes.insert(
                    session.room_code.clone(),
                    Expiring {
                        value: session.id.clone(),
                        expires_at,
                    },
                );
                inner.active.insert(session.id.clone());
            }
            inner.sessions.insert(
                session.id.clone(),
                Expiring {
                    value: session,
                    expires_at,
                },
            );
        }
        self
    }

    /// Make every operation fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Names of the operations called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Session id the room code currently maps to, ignoring status.
    pub fn room_code_owner(&self, room_code: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .room_codes
            .get(room_code)
            .filter(|e| e.live(Instant::now()))
            .map(|e| e.value.clone())
    }

    /// Raw peer-set members, including ids whose record has expired.
    pub fn peer_set_members(&self, session_id: &str) -> HashSet<String> {
        let inner = self.inner.lock().unwrap();
        inner.peer_set(session_id, Instant::now())
    }

    /// Current status of a live peer record.
    pub fn peer_status(&self, peer_id: &str) -> Option<PeerStatus> {
        let inner = self.inner.lock().unwrap();
        inner.peer(peer_id, Instant::now()).map(|p| p.status)
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("create_session")?;
        if session.max_peers == 0 {
            return Err(StoreError::InvalidSession(
                "max_peers must be positive".to_string(),
            ));
        }
        if normalize_room_code(&session.room_code).as_deref() != Some(session.room_code.as_str()) {
            return Err(StoreError::InvalidRoomCode);
        }

        let expires_at = now + inner.ttl.session;
        inner.sessions.insert(
            session.id.clone(),
            Expiring {
                value: session.clone(),
                expires_at,
            },
        );
        inner.room_codes.insert(
            session.room_code.clone(),
            Expiring {
                value: session.id.clone(),
                expires_at,
            },
        );
        inner.active.insert(session.id.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("get_session")?;
        inner
            .session(session_id, now)
            .cloned()
            .ok_or(StoreError::SessionNotFound)
    }

    async fn get_session_by_room_code(&self, room_code: &str) -> Result<Session, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("get_session_by_room_code")?;
        let code = normalize_room_code(room_code).ok_or(StoreError::InvalidRoomCode)?;

        let session_id = inner
            .room_codes
            .get(&code)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone())
            .ok_or(StoreError::InvalidRoomCode)?;
        let session = inner
            .session(&session_id, now)
            .cloned()
            .ok_or(StoreError::SessionNotFound)?;

        if session.is_closed() || session.room_code != code {
            return Err(StoreError::InvalidRoomCode);
        }
        Ok(session)
    }

    async fn close_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("close_session")?;
        let session = inner
            .session(session_id, now)
            .cloned()
            .ok_or(StoreError::SessionNotFound)?;

        if !session.is_closed() {
            let owned = inner
                .room_codes
                .get(&session.room_code)
                .is_some_and(|e| e.live(now) && e.value == session_id);
            if owned {
                inner.room_codes.remove(&session.room_code);
            }
            if let Some(entry) = inner.sessions.get_mut(session_id) {
                entry.value.status = SessionStatus::Closed;
            }
        }
        inner.active.remove(session_id);
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("delete_session")?;
        let session = inner
            .session(session_id, now)
            .cloned()
            .ok_or(StoreError::SessionNotFound)?;

        let peer_ids = inner.peer_set(session_id, now);
        inner.sessions.remove(session_id);
        inner.peer_sets.remove(session_id);
        inner.active.remove(session_id);
        let owned = inner
            .room_codes
            .get(&session.room_code)
            .is_some_and(|e| e.value == session_id);
        if owned {
            inner.room_codes.remove(&session.room_code);
        }
        for peer_id in peer_ids {
            inner.peers.remove(&peer_id);
        }
        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("list_active_sessions")?;

        let live: HashSet<String> = inner
            .active
            .iter()
            .filter(|id| inner.session(id, now).is_some())
            .cloned()
            .collect();
        inner.active.clone_from(&live);

        let mut ids: Vec<String> = live.into_iter().collect();
        ids.sort();
        Ok(ids)
    }

    async fn add_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("add_peer")?;
        let session = inner
            .session(&peer.session_id, now)
            .cloned()
            .ok_or(StoreError::SessionNotFound)?;
        if session.is_closed() {
            return Err(StoreError::SessionClosed);
        }

        let members: HashSet<String> = inner
            .peer_set(&peer.session_id, now)
            .into_iter()
            .filter(|id| inner.peer(id, now).is_some())
            .collect();
        if members.len() >= session.max_peers as usize {
            if let Some(entry) = inner.peer_sets.get_mut(&peer.session_id) {
                entry.value.clone_from(&members);
            }
            return Err(StoreError::SessionFull);
        }

        let mut members = members;
        members.insert(peer.id.clone());
        let session_expiry = inner
            .session_expiry(&peer.session_id, now)
            .ok_or(StoreError::SessionNotFound)?;
        let peer_expiry = (now + inner.ttl.peer).min(session_expiry);
        let set_expiry = (now + inner.ttl.session).min(session_expiry);
        inner.peers.insert(
            peer.id.clone(),
            Expiring {
                value: peer.clone(),
                expires_at: peer_expiry,
            },
        );
        inner.peer_sets.insert(
            peer.session_id.clone(),
            Expiring {
                value: members,
                expires_at: set_expiry,
            },
        );
        Ok(())
    }

    async fn get_peer(&self, peer_id: &str) -> Result<Peer, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("get_peer")?;
        inner
            .peer(peer_id, now)
            .cloned()
            .ok_or(StoreError::PeerNotFound)
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("remove_peer")?;
        let session_id = inner
            .peer(peer_id, now)
            .map(|p| p.session_id.clone())
            .ok_or(StoreError::PeerNotFound)?;

        inner.peers.remove(peer_id);
        if let Some(entry) = inner.peer_sets.get_mut(&session_id) {
            entry.value.remove(peer_id);
        }
        Ok(())
    }

    async fn list_session_peers(&self, session_id: &str) -> Result<Vec<Peer>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("list_session_peers")?;

        let mut peers: Vec<Peer> = inner
            .peer_set(session_id, now)
            .iter()
            .filter_map(|id| inner.peer(id, now).cloned())
            .collect();
        peers.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        Ok(peers)
    }

    async fn update_peer_status(
        &self,
        peer_id: &str,
        status: PeerStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.check("update_peer_status")?;
        let session_id = inner
            .peer(peer_id, now)
            .map(|p| p.session_id.clone())
            .ok_or(StoreError::PeerNotFound)?;
        let Some(session_expiry) = inner.session_expiry(&session_id, now) else {
            inner.peers.remove(peer_id);
            return Err(StoreError::PeerNotFound);
        };

        let expires_at = (now + inner.ttl.peer).min(session_expiry);
        let entry = inner
            .peers
            .get_mut(peer_id)
            .ok_or(StoreError::PeerNotFound)?;
        entry.value.status = status;
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.check("ping").map(|_| ())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push("close");
        inner.closed = true;
    }
}

//! Redis-backed membership store.
//!
//! # Key Patterns
//!
//! - `session:{id}` - Session record (HASH, session TTL)
//! - `session:{id}:peers` - Peer ids of a session (SET, refreshed on join, capped by session)
//! - `peer:{id}` - Peer record (HASH, peer TTL capped by session)
//! - `roomcode:{code}` - Room code to session id (STRING, session TTL)
//! - `session:active` - Ids of active sessions (SET, pruned lazily)
//!
//! # Atomicity
//!
//! Blind multi-key writes go through `MULTI/EXEC` pipelines. Mutations that
//! must check state first (capacity, status, existence) or read a set before
//! deleting its members run as Lua scripts from [`super::lua_scripts`]. The
//! scripts touch `peer:{id}` keys they do not declare, so the store assumes a
//! single Redis node.
//!
//! # Connection Pattern
//!
//! `ConnectionManager` is cheap to clone and reconnects on its own; each
//! operation clones it instead of sharing it behind a lock.

use super::{lua_scripts, SessionStore, StoreTtl};
use crate::errors::StoreError;
use crate::models::{Peer, PeerStatus, Session};
use crate::observability::metrics;
use crate::room_code::normalize_room_code;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

const ACTIVE_SESSIONS_KEY: &str = "session:active";
const PEER_KEY_PREFIX: &str = "peer:";
const ROOM_CODE_KEY_PREFIX: &str = "roomcode:";

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn peers_key(session_id: &str) -> String {
    format!("session:{session_id}:peers")
}

fn peer_key(peer_id: &str) -> String {
    format!("{PEER_KEY_PREFIX}{peer_id}")
}

fn room_code_key(code: &str) -> String {
    format!("{ROOM_CODE_KEY_PREFIX}{code}")
}

/// Membership store on a single Redis deployment.
pub struct RedisSessionStore {
    connection: ConnectionManager,
    ttl: StoreTtl,
    closed: AtomicBool,
    add_peer_script: Script,
    update_peer_status_script: Script,
    close_session_script: Script,
    delete_session_script: Script,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StoreUnavailable` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str, ttl: StoreTtl) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may carry credentials
            error!(target: "sig.store.redis", error = %e, "Failed to open Redis client");
            StoreError::StoreUnavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!(target: "sig.store.redis", error = %e, "Failed to connect to Redis");
            StoreError::StoreUnavailable(format!("Failed to connect to Redis: {e}"))
        })?;

        Ok(Self {
            connection,
            ttl,
            closed: AtomicBool::new(false),
            add_peer_script: Script::new(lua_scripts::ADD_PEER),
            update_peer_status_script: Script::new(lua_scripts::UPDATE_PEER_STATUS),
            close_session_script: Script::new(lua_scripts::CLOSE_SESSION),
            delete_session_script: Script::new(lua_scripts::DELETE_SESSION),
        })
    }

    fn conn(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::StoreUnavailable("store is closed".to_string()));
        }
        Ok(self.connection.clone())
    }

    fn session_ttl_secs(&self) -> i64 {
        ttl_secs(self.ttl.session)
    }

    fn peer_ttl_secs(&self) -> i64 {
        ttl_secs(self.ttl.peer)
    }

    async fn read_session(
        &self,
        conn: &mut ConnectionManager,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let fields: HashMap<String, String> = conn
            .hgetall(session_key(session_id))
            .await
            .map_err(|e| redis_error("get_session", &e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_session(&fields).map(Some)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all, fields(session_id = %session.id))]
    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        observe("create_session", async {
            if session.max_peers == 0 {
                return Err(StoreError::InvalidSession(
                    "max_peers must be positive".to_string(),
                ));
            }
            if normalize_room_code(&session.room_code).as_deref() != Some(session.room_code.as_str())
            {
                return Err(StoreError::InvalidRoomCode);
            }

            let mut conn = self.conn()?;
            let key = session_key(&session.id);
            let ttl = self.session_ttl_secs();

            let _: () = redis::pipe()
                .atomic()
                .del(&key)
                .ignore()
                .hset_multiple(&key, &session_fields(session))
                .ignore()
                .expire(&key, ttl)
                .ignore()
                .set_ex(room_code_key(&session.room_code), &session.id, ttl.unsigned_abs())
                .ignore()
                .sadd(ACTIVE_SESSIONS_KEY, &session.id)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("create_session", &e))?;

            debug!(target: "sig.store.redis", session_id = %session.id, "Created session");
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        observe("get_session", async {
            let mut conn = self.conn()?;
            self.read_session(&mut conn, session_id)
                .await?
                .ok_or(StoreError::SessionNotFound)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn get_session_by_room_code(&self, room_code: &str) -> Result<Session, StoreError> {
        observe("get_session_by_room_code", async {
            let code = normalize_room_code(room_code).ok_or(StoreError::InvalidRoomCode)?;
            let mut conn = self.conn()?;

            let session_id: Option<String> = conn
                .get(room_code_key(&code))
                .await
                .map_err(|e| redis_error("get_session_by_room_code", &e))?;
            let session_id = session_id.ok_or(StoreError::InvalidRoomCode)?;

            let session = self
                .read_session(&mut conn, &session_id)
                .await?
                .ok_or(StoreError::SessionNotFound)?;

            if session.is_closed() || session.room_code != code {
                return Err(StoreError::InvalidRoomCode);
            }
            Ok(session)
        })
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn close_session(&self, session_id: &str) -> Result<(), StoreError> {
        observe("close_session", async {
            let mut conn = self.conn()?;
            let result: i64 = self
                .close_session_script
                .key(session_key(session_id))
                .key(ACTIVE_SESSIONS_KEY)
                .arg(session_id)
                .arg(ROOM_CODE_KEY_PREFIX)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_error("close_session", &e))?;

            match result {
                1 => {
                    debug!(target: "sig.store.redis", session_id = %session_id, "Closed session");
                    Ok(())
                }
                0 => Err(StoreError::SessionNotFound),
                other => Err(unexpected_script_result("close_session", other)),
            }
        })
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        observe("delete_session", async {
            let mut conn = self.conn()?;
            let result: i64 = self
                .delete_session_script
                .key(session_key(session_id))
                .key(peers_key(session_id))
                .key(ACTIVE_SESSIONS_KEY)
                .arg(session_id)
                .arg(ROOM_CODE_KEY_PREFIX)
                .arg(PEER_KEY_PREFIX)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_error("delete_session", &e))?;

            match result {
                -1 => Err(StoreError::SessionNotFound),
                peers if peers >= 0 => {
                    debug!(
                        target: "sig.store.redis",
                        session_id = %session_id,
                        peers,
                        "Deleted session"
                    );
                    Ok(())
                }
                other => Err(unexpected_script_result("delete_session", other)),
            }
        })
        .await
    }

    #[instrument(skip_all)]
    async fn list_active_sessions(&self) -> Result<Vec<String>, StoreError> {
        observe("list_active_sessions", async {
            let mut conn = self.conn()?;
            let mut ids: Vec<String> = conn
                .smembers(ACTIVE_SESSIONS_KEY)
                .await
                .map_err(|e| redis_error("list_active_sessions", &e))?;
            if ids.is_empty() {
                return Ok::<_, StoreError>(ids);
            }

            let mut pipe = redis::pipe();
            for id in &ids {
                pipe.exists(session_key(id));
            }
            let exists: Vec<bool> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("list_active_sessions", &e))?;

            let stale: Vec<String> = ids
                .iter()
                .zip(&exists)
                .filter(|(_, live)| !**live)
                .map(|(id, _)| id.clone())
                .collect();
            if !stale.is_empty() {
                let pruned: Result<(), RedisError> =
                    conn.srem(ACTIVE_SESSIONS_KEY, &stale).await;
                if let Err(e) = pruned {
                    warn!(target: "sig.store.redis", error = %e, "Failed to prune expired sessions from active index");
                }
                ids.retain(|id| !stale.contains(id));
            }

            ids.sort();
            Ok::<_, StoreError>(ids)
        })
        .await
    }

    #[instrument(skip_all, fields(session_id = %peer.session_id, peer_id = %peer.id))]
    async fn add_peer(&self, peer: &Peer) -> Result<(), StoreError> {
        observe("add_peer", async {
            let mut conn = self.conn()?;

            let mut invocation = self.add_peer_script.prepare_invoke();
            invocation
                .key(session_key(&peer.session_id))
                .key(peers_key(&peer.session_id))
                .key(peer_key(&peer.id))
                .arg(&peer.id)
                .arg(self.peer_ttl_secs())
                .arg(self.session_ttl_secs())
                .arg(PEER_KEY_PREFIX);
            for (field, value) in peer_fields(peer) {
                invocation.arg(field).arg(value);
            }

            let result: i64 = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_error("add_peer", &e))?;

            match result {
                1 => {
                    debug!(
                        target: "sig.store.redis",
                        session_id = %peer.session_id,
                        peer_id = %peer.id,
                        "Added peer"
                    );
                    Ok(())
                }
                0 => Err(StoreError::SessionFull),
                -1 => Err(StoreError::SessionNotFound),
                -2 => Err(StoreError::SessionClosed),
                other => Err(unexpected_script_result("add_peer", other)),
            }
        })
        .await
    }

    #[instrument(skip_all, fields(peer_id = %peer_id))]
    async fn get_peer(&self, peer_id: &str) -> Result<Peer, StoreError> {
        observe("get_peer", async {
            let mut conn = self.conn()?;
            let fields: HashMap<String, String> = conn
                .hgetall(peer_key(peer_id))
                .await
                .map_err(|e| redis_error("get_peer", &e))?;

            if fields.is_empty() {
                return Err(StoreError::PeerNotFound);
            }
            parse_peer(&fields)
        })
        .await
    }

    #[instrument(skip_all, fields(peer_id = %peer_id))]
    async fn remove_peer(&self, peer_id: &str) -> Result<(), StoreError> {
        observe("remove_peer", async {
            let mut conn = self.conn()?;
            let session_id: Option<String> = conn
                .hget(peer_key(peer_id), "session_id")
                .await
                .map_err(|e| redis_error("remove_peer", &e))?;
            let session_id = session_id.ok_or(StoreError::PeerNotFound)?;

            let _: () = redis::pipe()
                .atomic()
                .del(peer_key(peer_id))
                .ignore()
                .srem(peers_key(&session_id), peer_id)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("remove_peer", &e))?;

            debug!(
                target: "sig.store.redis",
                session_id = %session_id,
                peer_id = %peer_id,
                "Removed peer"
            );
            Ok::<_, StoreError>(())
        })
        .await
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn list_session_peers(&self, session_id: &str) -> Result<Vec<Peer>, StoreError> {
        observe("list_session_peers", async {
            let mut conn = self.conn()?;
            let peer_ids: Vec<String> = conn
                .smembers(peers_key(session_id))
                .await
                .map_err(|e| redis_error("list_session_peers", &e))?;
            if peer_ids.is_empty() {
                return Ok::<_, StoreError>(Vec::new());
            }

            let mut pipe = redis::pipe();
            for peer_id in &peer_ids {
                pipe.hgetall(peer_key(peer_id));
            }
            let records: Vec<HashMap<String, String>> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("list_session_peers", &e))?;

            let mut peers = records
                .iter()
                .filter(|fields| !fields.is_empty())
                .map(parse_peer)
                .collect::<Result<Vec<_>, _>>()?;
            peers.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
            Ok(peers)
        })
        .await
    }

    #[instrument(skip_all, fields(peer_id = %peer_id, status = %status))]
    async fn update_peer_status(
        &self,
        peer_id: &str,
        status: PeerStatus,
    ) -> Result<(), StoreError> {
        observe("update_peer_status", async {
            let mut conn = self.conn()?;
            let session_id: Option<String> = conn
                .hget(peer_key(peer_id), "session_id")
                .await
                .map_err(|e| redis_error("update_peer_status", &e))?;
            let session_id = session_id.ok_or(StoreError::PeerNotFound)?;

            let result: i64 = self
                .update_peer_status_script
                .key(peer_key(peer_id))
                .key(session_key(&session_id))
                .arg(status.as_str())
                .arg(self.peer_ttl_secs())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_error("update_peer_status", &e))?;

            match result {
                1 => Ok(()),
                0 => Err(StoreError::PeerNotFound),
                other => Err(unexpected_script_result("update_peer_status", other)),
            }
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        observe("ping", async {
            let mut conn = self.conn()?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("ping", &e))?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!(target: "sig.store.redis", "Closed Redis session store");
    }
}

/// Time a store operation and record it.
async fn observe<T, F>(operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let result = fut.await;
    metrics::record_store_latency(operation, start.elapsed(), result.is_ok());
    result
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

fn redis_error(operation: &'static str, e: &RedisError) -> StoreError {
    warn!(target: "sig.store.redis", error = %e, operation, "Redis operation failed");
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StoreError::StoreUnavailable(format!("{operation}: {e}"))
    } else {
        StoreError::Internal(format!("{operation}: {e}"))
    }
}

fn unexpected_script_result(operation: &'static str, result: i64) -> StoreError {
    error!(target: "sig.store.redis", operation, result, "Unexpected script result");
    StoreError::Internal(format!("{operation}: unexpected script result {result}"))
}

fn session_fields(session: &Session) -> Vec<(&'static str, String)> {
    vec![
        ("id", session.id.clone()),
        ("room_code", session.room_code.clone()),
        ("created_at", session.created_at.to_rfc3339()),
        ("max_peers", session.max_peers.to_string()),
        ("status", session.status.as_str().to_string()),
    ]
}

fn peer_fields(peer: &Peer) -> Vec<(&'static str, String)> {
    vec![
        ("id", peer.id.clone()),
        ("session_id", peer.session_id.clone()),
        ("user_id", peer.user_id.clone()),
        ("role", peer.role.clone()),
        ("joined_at", peer.joined_at.to_rfc3339()),
        ("status", peer.status.as_str().to_string()),
    ]
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, StoreError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Internal(format!("record missing field {name}")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("invalid timestamp {value:?}: {e}")))
}

fn parse_session(fields: &HashMap<String, String>) -> Result<Session, StoreError> {
    Ok(Session {
        id: field(fields, "id")?.to_string(),
        room_code: field(fields, "room_code")?.to_string(),
        created_at: parse_timestamp(field(fields, "created_at")?)?,
        max_peers: field(fields, "max_peers")?
            .parse()
            .map_err(|e| StoreError::Internal(format!("invalid max_peers: {e}")))?,
        status: field(fields, "status")?
            .parse()
            .map_err(|e| StoreError::Internal(format!("invalid session status: {e}")))?,
    })
}

fn parse_peer(fields: &HashMap<String, String>) -> Result<Peer, StoreError> {
    Ok(Peer {
        id: field(fields, "id")?.to_string(),
        session_id: field(fields, "session_id")?.to_string(),
        user_id: field(fields, "user_id")?.to_string(),
        role: field(fields, "role")?.to_string(),
        joined_at: parse_timestamp(field(fields, "joined_at")?)?,
        status: field(fields, "status")?
            .parse()
            .map_err(|e| StoreError::Internal(format!("invalid peer status: {e}")))?,
    })
}

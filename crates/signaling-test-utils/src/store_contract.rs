//! Behavior every [`SessionStore`] must share.
//!
//! Each check uses fresh random ids and room codes, so the suite can run
//! against a shared Redis without cleanup between runs.
//!
//! ```rust,ignore
//! let store = MockSessionStore::new();
//! store_contract::run_all(&store).await;
//! ```

use crate::fixtures::{TestPeer, TestSession};
use signaling_service::errors::StoreError;
use signaling_service::models::{PeerStatus, SessionStatus};
use signaling_service::store::SessionStore;

/// Create, then look up by id and by room code in any letter case.
pub async fn create_then_lookup(store: &dyn SessionStore) {
    let session = TestSession::random().with_max_peers(3).build();
    store.create_session(&session).await.unwrap();

    let by_id = store.get_session(&session.id).await.unwrap();
    assert_eq!(by_id.room_code, session.room_code);
    assert_eq!(by_id.max_peers, 3);
    assert_eq!(by_id.status, SessionStatus::Active);
    assert_eq!(by_id.created_at.timestamp(), session.created_at.timestamp());

    let by_code = store
        .get_session_by_room_code(&session.room_code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(by_code.id, session.id);

    assert!(store
        .list_active_sessions()
        .await
        .unwrap()
        .contains(&session.id));
}

/// Zero capacity and malformed room codes never reach the store.
pub async fn create_rejects_invalid_sessions(store: &dyn SessionStore) {
    let zero = TestSession::random().with_max_peers(0).build();
    assert!(matches!(
        store.create_session(&zero).await,
        Err(StoreError::InvalidSession(_))
    ));

    let bad_code = TestSession::random().with_room_code("ab-12").build();
    assert!(matches!(
        store.create_session(&bad_code).await,
        Err(StoreError::InvalidRoomCode)
    ));
    assert!(matches!(
        store.get_session(&bad_code.id).await,
        Err(StoreError::SessionNotFound)
    ));
}

/// Unknown ids and codes.
pub async fn missing_records(store: &dyn SessionStore) {
    let ghost = TestSession::random();
    assert!(matches!(
        store.get_session(&ghost.id).await,
        Err(StoreError::SessionNotFound)
    ));
    assert!(matches!(
        store.get_session_by_room_code(&ghost.room_code).await,
        Err(StoreError::InvalidRoomCode)
    ));
    assert!(matches!(
        store.get_session_by_room_code("nope").await,
        Err(StoreError::InvalidRoomCode)
    ));
    assert!(matches!(
        store.get_peer("peer-does-not-exist").await,
        Err(StoreError::PeerNotFound)
    ));
    assert!(matches!(
        store.close_session(&ghost.id).await,
        Err(StoreError::SessionNotFound)
    ));
    assert!(matches!(
        store.delete_session(&ghost.id).await,
        Err(StoreError::SessionNotFound)
    ));
    assert!(store.list_session_peers(&ghost.id).await.unwrap().is_empty());
}

/// Capacity is enforced; a removed peer frees its slot.
pub async fn capacity_is_enforced(store: &dyn SessionStore) {
    let session = TestSession::random().with_max_peers(2).build();
    store.create_session(&session).await.unwrap();

    let first = TestPeer::new(&session.id, "u1").build();
    let second = TestPeer::new(&session.id, "u2").build();
    let third = TestPeer::new(&session.id, "u3").build();
    store.add_peer(&first).await.unwrap();
    store.add_peer(&second).await.unwrap();

    assert!(matches!(
        store.add_peer(&third).await,
        Err(StoreError::SessionFull)
    ));
    assert!(matches!(
        store.get_peer(&third.id).await,
        Err(StoreError::PeerNotFound)
    ));

    store.remove_peer(&first.id).await.unwrap();
    store.add_peer(&third).await.unwrap();

    let ids: Vec<String> = store
        .list_session_peers(&session.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&second.id));
    assert!(ids.contains(&third.id));
    assert!(!ids.contains(&first.id));
}

/// Peers cannot join a missing or closed session.
pub async fn add_peer_requires_active_session(store: &dyn SessionStore) {
    let ghost = TestSession::random();
    assert!(matches!(
        store.add_peer(&TestPeer::new(&ghost.id, "u1").build()).await,
        Err(StoreError::SessionNotFound)
    ));

    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();
    store.close_session(&session.id).await.unwrap();
    assert!(matches!(
        store.add_peer(&TestPeer::new(&session.id, "u1").build()).await,
        Err(StoreError::SessionClosed)
    ));
}

/// A closed session reports closed even when it is also full.
pub async fn closed_full_session_reports_closed(store: &dyn SessionStore) {
    let session = TestSession::random().with_max_peers(1).build();
    store.create_session(&session).await.unwrap();
    store
        .add_peer(&TestPeer::new(&session.id, "u1").build())
        .await
        .unwrap();
    store.close_session(&session.id).await.unwrap();

    assert!(matches!(
        store.add_peer(&TestPeer::new(&session.id, "u2").build()).await,
        Err(StoreError::SessionClosed)
    ));
}

/// Peer fields survive the round trip; status updates are idempotent.
pub async fn peer_round_trip_and_status(store: &dyn SessionStore) {
    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();
    let peer = TestPeer::new(&session.id, "u1").with_role("director").build();
    store.add_peer(&peer).await.unwrap();

    let stored = store.get_peer(&peer.id).await.unwrap();
    assert_eq!(stored.session_id, session.id);
    assert_eq!(stored.user_id, "u1");
    assert_eq!(stored.role, "director");
    assert_eq!(stored.status, PeerStatus::Connected);

    store
        .update_peer_status(&peer.id, PeerStatus::Disconnected)
        .await
        .unwrap();
    store
        .update_peer_status(&peer.id, PeerStatus::Disconnected)
        .await
        .unwrap();
    assert_eq!(
        store.get_peer(&peer.id).await.unwrap().status,
        PeerStatus::Disconnected
    );

    store.remove_peer(&peer.id).await.unwrap();
    assert!(matches!(
        store.update_peer_status(&peer.id, PeerStatus::Connected).await,
        Err(StoreError::PeerNotFound)
    ));
    assert!(matches!(
        store.remove_peer(&peer.id).await,
        Err(StoreError::PeerNotFound)
    ));
}

/// Closing unmaps the room code and leaves the active index, but keeps the
/// record readable. Closing twice is fine.
pub async fn close_unmaps_room_code(store: &dyn SessionStore) {
    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();

    store.close_session(&session.id).await.unwrap();
    store.close_session(&session.id).await.unwrap();

    assert_eq!(
        store.get_session(&session.id).await.unwrap().status,
        SessionStatus::Closed
    );
    assert!(matches!(
        store.get_session_by_room_code(&session.room_code).await,
        Err(StoreError::InvalidRoomCode)
    ));
    assert!(!store
        .list_active_sessions()
        .await
        .unwrap()
        .contains(&session.id));
}

/// Deleting removes the session, its code and every peer.
pub async fn delete_removes_everything(store: &dyn SessionStore) {
    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();
    let peer = TestPeer::new(&session.id, "u1").build();
    store.add_peer(&peer).await.unwrap();

    store.delete_session(&session.id).await.unwrap();

    assert!(matches!(
        store.get_session(&session.id).await,
        Err(StoreError::SessionNotFound)
    ));
    assert!(matches!(
        store.get_session_by_room_code(&session.room_code).await,
        Err(StoreError::InvalidRoomCode)
    ));
    assert!(matches!(
        store.get_peer(&peer.id).await,
        Err(StoreError::PeerNotFound)
    ));
    assert!(store.list_session_peers(&session.id).await.unwrap().is_empty());
    assert!(!store
        .list_active_sessions()
        .await
        .unwrap()
        .contains(&session.id));
}

/// A room code freed by closing can be reused; deleting the old closed
/// session leaves the new mapping alone.
pub async fn reused_room_code_survives_old_delete(store: &dyn SessionStore) {
    let old = TestSession::random().build();
    store.create_session(&old).await.unwrap();
    store.close_session(&old.id).await.unwrap();

    let new = TestSession::random()
        .with_room_code(old.room_code.clone())
        .build();
    store.create_session(&new).await.unwrap();
    store.delete_session(&old.id).await.unwrap();

    let resolved = store
        .get_session_by_room_code(&old.room_code)
        .await
        .unwrap();
    assert_eq!(resolved.id, new.id);
}

/// Peers are listed oldest first.
pub async fn peers_listed_in_join_order(store: &dyn SessionStore) {
    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();

    let base = chrono::Utc::now();
    let later = TestPeer::new(&session.id, "late")
        .joined_at(base + chrono::Duration::seconds(5))
        .build();
    let earlier = TestPeer::new(&session.id, "early").joined_at(base).build();
    store.add_peer(&later).await.unwrap();
    store.add_peer(&earlier).await.unwrap();

    let users: Vec<String> = store
        .list_session_peers(&session.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.user_id)
        .collect();
    assert_eq!(users, vec!["early".to_string(), "late".to_string()]);
}

/// The two-peer scenario: create s1/ABC123 with room for two, join a camera
/// and a director, reject a third, list both.
pub async fn two_peer_scenario(store: &dyn SessionStore, session_id: &str, room_code: &str) {
    let session = TestSession::new(session_id)
        .with_room_code(room_code)
        .with_max_peers(2)
        .build();
    store.create_session(&session).await.unwrap();

    let camera = TestPeer::new(session_id, "cam").build();
    let director = TestPeer::new(session_id, "dir").with_role("director").build();
    store.add_peer(&camera).await.unwrap();
    store.add_peer(&director).await.unwrap();
    assert!(matches!(
        store.add_peer(&TestPeer::new(session_id, "extra").build()).await,
        Err(StoreError::SessionFull)
    ));

    let resolved = store.get_session_by_room_code(room_code).await.unwrap();
    assert_eq!(resolved.id, session_id);
    assert_eq!(store.list_session_peers(session_id).await.unwrap().len(), 2);

    store.delete_session(session_id).await.unwrap();
}

/// Run every check in this module.
pub async fn run_all(store: &dyn SessionStore) {
    create_then_lookup(store).await;
    create_rejects_invalid_sessions(store).await;
    missing_records(store).await;
    capacity_is_enforced(store).await;
    add_peer_requires_active_session(store).await;
    closed_full_session_reports_closed(store).await;
    peer_round_trip_and_status(store).await;
    close_unmaps_room_code(store).await;
    delete_removes_everything(store).await;
    reused_room_code_survives_old_delete(store).await;
    peers_listed_in_join_order(store).await;
}

//! Redis store tests.
//!
//! These need a running Redis and are ignored by default:
//!
//! ```text
//! REDIS_URL=redis://localhost:6379 cargo test -p signaling-service --test redis_store_tests -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use signaling_service::errors::StoreError;
use signaling_service::models::PeerStatus;
use signaling_service::room_code::generate_room_code;
use signaling_service::store::{RedisSessionStore, SessionStore, StoreTtl};
use signaling_test_utils::{store_contract, TestPeer, TestSession};
use std::time::Duration;

async fn connect(ttl: StoreTtl) -> RedisSessionStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisSessionStore::connect(&url, ttl)
        .await
        .expect("Redis must be reachable at REDIS_URL")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_store_contract_against_redis() {
    let store = connect(StoreTtl::default()).await;
    store.ping().await.unwrap();
    store_contract::run_all(&store).await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_two_peer_scenario_against_redis() {
    let store = connect(StoreTtl::default()).await;
    let session_id = format!("s1-{}", uuid::Uuid::new_v4());
    let code = generate_room_code().unwrap();
    store_contract::two_peer_scenario(&store, &session_id, &code).await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_peer_expiry_against_redis() {
    let store = connect(StoreTtl {
        session: Duration::from_secs(30),
        peer: Duration::from_secs(1),
    })
    .await;
    let session = TestSession::random().with_max_peers(1).build();
    store.create_session(&session).await.unwrap();
    let stale = TestPeer::new(&session.id, "u1").build();
    store.add_peer(&stale).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_200)).await;

    assert!(store.list_session_peers(&session.id).await.unwrap().is_empty());
    assert!(matches!(
        store.update_peer_status(&stale.id, PeerStatus::Connected).await,
        Err(StoreError::PeerNotFound)
    ));
    // The expired id must not hold the only slot
    store
        .add_peer(&TestPeer::new(&session.id, "u2").build())
        .await
        .unwrap();

    store.delete_session(&session.id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_peer_expires_with_session_against_redis() {
    let store = connect(StoreTtl {
        session: Duration::from_secs(1),
        peer: Duration::from_secs(30),
    })
    .await;
    let session = TestSession::random().build();
    store.create_session(&session).await.unwrap();
    let peer = TestPeer::new(&session.id, "u1").build();
    store.add_peer(&peer).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;

    assert!(matches!(
        store.get_peer(&peer.id).await,
        Err(StoreError::PeerNotFound)
    ));
    assert!(store.list_session_peers(&session.id).await.unwrap().is_empty());
    assert!(matches!(
        store.update_peer_status(&peer.id, PeerStatus::Connected).await,
        Err(StoreError::PeerNotFound)
    ));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_closed_store_reports_unavailable() {
    let store = connect(StoreTtl::default()).await;
    store.close().await;

    assert!(matches!(
        store.ping().await,
        Err(StoreError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn test_unreachable_redis_is_unavailable() {
    // Nothing listens on port 1
    let result = RedisSessionStore::connect("redis://127.0.0.1:1", StoreTtl::default()).await;
    assert!(matches!(result, Err(StoreError::StoreUnavailable(_))));
}

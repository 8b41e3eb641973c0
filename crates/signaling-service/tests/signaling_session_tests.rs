//! Signaling session tests against the in-memory store and mock negotiator.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proto_gen::signaling::{signal_reply, trickle, SignalReply, SignalRequest};
use signaling_service::errors::SignalingError;
use signaling_service::media::{JoinConfig, NegotiatorEvent, SdpType, Target};
use signaling_service::models::PeerStatus;
use signaling_service::signaling::{ConnectionState, SignalingSession};
use signaling_service::store::SessionStore;
use signaling_test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    inbound: Option<mpsc::Sender<Result<SignalRequest, Status>>>,
    outbound: mpsc::Receiver<Result<SignalReply, Status>>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), SignalingError>>,
}

impl Harness {
    fn start(store: &MockSessionStore, negotiators: &MockNegotiatorFactory) -> Self {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let session = SignalingSession::new(
            Arc::new(store.clone()),
            Arc::new(negotiators.clone()),
            out_tx,
            cancel.clone(),
        );
        let state = session.subscribe_state();
        assert_eq!(session.state(), ConnectionState::Connected);
        let task = tokio::spawn(session.run(ReceiverStream::new(in_rx)));

        Self {
            inbound: Some(in_tx),
            outbound: out_rx,
            state,
            cancel,
            task,
        }
    }

    async fn send(&self, request: SignalRequest) {
        self.inbound
            .as_ref()
            .expect("inbound open")
            .send(Ok(request))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> SignalReply {
        tokio::time::timeout(REPLY_TIMEOUT, self.outbound.recv())
            .await
            .expect("reply within timeout")
            .expect("outbound stream open")
            .expect("reply is not a status")
    }

    async fn assert_no_reply(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.outbound.recv()).await;
        assert!(next.is_err(), "unexpected reply: {next:?}");
    }

    /// Join and return the peer id.
    async fn join(&mut self, session_id: &str, user_id: &str, role: &str) -> String {
        self.send(join_request("join", session_id, user_id, role))
            .await;
        match self.recv().await.payload {
            Some(signal_reply::Payload::Join(join)) => join.peer_id,
            other => panic!("expected join reply, got {other:?}"),
        }
    }

    /// End the inbound stream cleanly and wait for the session to finish.
    async fn finish(mut self) -> Result<(), SignalingError> {
        self.inbound.take();
        self.task.await.unwrap()
    }
}

fn error_code(reply: &SignalReply) -> &str {
    match &reply.payload {
        Some(signal_reply::Payload::Error(err)) => &err.code,
        other => panic!("expected error reply, got {other:?}"),
    }
}

fn store_with(session: TestSession) -> MockSessionStore {
    MockSessionStore::new().with_session(session.build())
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_join_returns_answer_and_registers_peer() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().with_answer_sdp("v=0 answer");
    let mut h = Harness::start(&store, &negotiators);

    h.send(join_request("1", "s1", "u1", "camera")).await;
    let reply = h.recv().await;

    assert_eq!(reply.id, "1");
    let Some(signal_reply::Payload::Join(join)) = reply.payload else {
        panic!("expected join reply");
    };
    let answer = join.description.unwrap();
    assert_eq!(answer.r#type, "answer");
    assert_eq!(answer.sdp, "v=0 answer");
    assert!(!join.peer_id.is_empty());

    let peer = store.get_peer(&join.peer_id).await.unwrap();
    assert_eq!(peer.session_id, "s1");
    assert_eq!(peer.user_id, "u1");
    assert_eq!(peer.status, PeerStatus::Connected);

    let record = negotiators.peer(0).unwrap().record();
    assert_eq!(
        record.joined,
        Some((
            "s1".to_string(),
            "u1".to_string(),
            JoinConfig {
                no_publish: false,
                no_subscribe: true
            }
        ))
    );
    assert_eq!(record.answered.len(), 1);
    assert_eq!(record.answered[0].sdp_type, SdpType::Offer);

    h.state.wait_for(|s| *s == ConnectionState::Joined).await.unwrap();
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_director_joins_with_subscribe_only_config() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "d1", "director").await;

    let (_, _, config) = negotiators.peer(0).unwrap().record().joined.unwrap();
    assert!(config.no_publish);
    assert!(!config.no_subscribe);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_unknown_role_is_rejected_before_touching_the_store() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.send(join_request("1", "s1", "u1", "admin")).await;
    let reply = h.recv().await;
    assert_eq!(reply.id, "1");
    assert_eq!(error_code(&reply), "invalid_input");
    assert!(!store.calls().contains(&"add_peer"));
    assert_eq!(negotiators.created(), 0);

    // The stream survives the failed join
    h.join("s1", "u1", "camera").await;
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_join_error_codes() {
    let cases = [
        (join_request("1", "missing", "u1", "camera"), "not_found"),
        (join_request("1", "s1", "", "camera"), "invalid_input"),
        (join_request("1", "", "u1", "camera"), "invalid_input"),
        (join_request("1", "s1", "u1", ""), "invalid_input"),
        (
            join_request_without_offer("1", "s1", "u1", "camera"),
            "invalid_input",
        ),
    ];

    for (request, expected) in cases {
        let store = store_with(TestSession::new("s1"));
        let negotiators = MockNegotiatorFactory::new();
        let mut h = Harness::start(&store, &negotiators);

        h.send(request).await;
        assert_eq!(error_code(&h.recv().await), expected);
        assert_eq!(*h.state.borrow(), ConnectionState::Connected);
        h.finish().await.unwrap();
    }
}

#[tokio::test]
async fn test_join_with_answer_description_is_rejected() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    let mut request = join_request("1", "s1", "u1", "camera");
    if let Some(proto_gen::signaling::signal_request::Payload::Join(join)) = request.payload.as_mut()
    {
        join.description.as_mut().unwrap().r#type = "answer".to_string();
    }
    h.send(request).await;

    assert_eq!(error_code(&h.recv().await), "invalid_input");
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_join_full_and_closed_sessions() {
    let store = MockSessionStore::new()
        .with_session(TestSession::new("full").with_max_peers(1).build())
        .with_session(
            TestSession::new("closed")
                .with_room_code("ZZZ999")
                .closed()
                .build(),
        );
    store
        .add_peer(&TestPeer::new("full", "someone").build())
        .await
        .unwrap();
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.send(join_request("1", "full", "u1", "camera")).await;
    assert_eq!(error_code(&h.recv().await), "conflict");

    h.send(join_request("2", "closed", "u1", "camera")).await;
    assert_eq!(error_code(&h.recv().await), "conflict");

    assert_eq!(negotiators.created(), 0);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_second_join_is_rejected() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    h.send(join_request("2", "s1", "u1", "camera")).await;

    let reply = h.recv().await;
    assert_eq!(reply.id, "2");
    assert_eq!(error_code(&reply), "conflict");
    assert_eq!(store.list_session_peers("s1").await.unwrap().len(), 1);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_failed_negotiation_releases_peer_and_negotiator() {
    for step in [FailAt::Join, FailAt::Answer] {
        let store = store_with(TestSession::new("s1"));
        let negotiators = MockNegotiatorFactory::new().failing_at(step);
        let mut h = Harness::start(&store, &negotiators);

        h.send(join_request("1", "s1", "u1", "camera")).await;
        let reply = h.recv().await;

        assert_eq!(error_code(&reply), "internal");
        let Some(signal_reply::Payload::Error(err)) = reply.payload else {
            unreachable!()
        };
        assert!(!err.message.contains("mock"), "internal detail leaked");
        assert!(store.list_session_peers("s1").await.unwrap().is_empty());
        assert!(negotiators.peer(0).unwrap().is_closed());
        assert_eq!(*h.state.borrow(), ConnectionState::Connected);
        h.finish().await.unwrap();
    }
}

#[tokio::test]
async fn test_negotiator_create_failure_removes_peer() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().failing_at(FailAt::Create);
    let mut h = Harness::start(&store, &negotiators);

    h.send(join_request("1", "s1", "u1", "camera")).await;
    assert_eq!(error_code(&h.recv().await), "internal");
    assert!(store.list_session_peers("s1").await.unwrap().is_empty());
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_store_outage_reports_unavailable() {
    let store = store_with(TestSession::new("s1"));
    store.set_unavailable(true);
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.send(join_request("1", "s1", "u1", "camera")).await;
    assert_eq!(error_code(&h.recv().await), "unavailable");
    h.finish().await.unwrap();
}

// ============================================================================
// Trickle and descriptions
// ============================================================================

#[tokio::test]
async fn test_trickle_reaches_permitted_leg_only() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    // Before join: dropped
    h.send(trickle_request("t0", Target::Publisher)).await;
    h.join("s1", "u1", "camera").await;

    h.send(trickle_request("t1", Target::Publisher)).await;
    // Camera has no subscriber leg
    h.send(trickle_request("t2", Target::Subscriber)).await;
    h.send(raw_trickle_request("t3", 9, &sample_candidate_json()))
        .await;
    h.send(raw_trickle_request(
        "t4",
        trickle::Target::Publisher.into(),
        "{not json",
    ))
    .await;
    h.assert_no_reply().await;

    let trickles = negotiators.peer(0).unwrap().record().trickles;
    assert_eq!(trickles.len(), 1);
    assert_eq!(trickles[0].0, sample_candidate());
    assert_eq!(trickles[0].1, Target::Publisher);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_trickle_failure_keeps_stream_open() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().failing_at(FailAt::Trickle);
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    h.send(trickle_request("t1", Target::Publisher)).await;
    h.assert_no_reply().await;

    h.send(description_request("d1", "offer", SAMPLE_OFFER_SDP))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply.id, "d1");
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_publisher_renegotiation_offer_is_answered() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().with_answer_sdp("v=0 again");
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    h.send(description_request("7", "offer", SAMPLE_OFFER_SDP))
        .await;

    let reply = h.recv().await;
    assert_eq!(reply.id, "7");
    let Some(signal_reply::Payload::Description(desc)) = reply.payload else {
        panic!("expected description reply");
    };
    assert_eq!(desc.r#type, "answer");
    assert_eq!(desc.sdp, "v=0 again");
    assert_eq!(negotiators.peer(0).unwrap().record().answered.len(), 2);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_director_descriptions_all_get_a_response() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().with_answer_sdp("v=0 director");
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "d1", "director").await;
    h.send(description_request("a1", "answer", "v=0 client answer"))
        .await;
    h.assert_no_reply().await;

    // The publisher leg negotiated at join is renegotiated like any other
    h.send(description_request("o1", "offer", SAMPLE_OFFER_SDP))
        .await;
    let reply = h.recv().await;
    assert_eq!(reply.id, "o1");
    let Some(signal_reply::Payload::Description(desc)) = reply.payload else {
        panic!("expected description reply, got {:?}", reply.payload);
    };
    assert_eq!(desc.r#type, "answer");
    assert_eq!(desc.sdp, "v=0 director");

    let record = negotiators.peer(0).unwrap().record();
    assert_eq!(record.remote_descriptions.len(), 1);
    assert_eq!(record.remote_descriptions[0].sdp, "v=0 client answer");
    assert_eq!(record.answered.len(), 2);
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_camera_subscriber_answer_gets_error_reply() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    h.send(description_request("a1", "answer", "v=0 client answer"))
        .await;

    let reply = h.recv().await;
    assert_eq!(reply.id, "a1");
    assert_eq!(error_code(&reply), "invalid_input");
    assert!(negotiators
        .peer(0)
        .unwrap()
        .record()
        .remote_descriptions
        .is_empty());
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_bad_description_gets_error_reply() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    h.send(description_request("x", "rollback", "v=0")).await;

    let reply = h.recv().await;
    assert_eq!(reply.id, "x");
    assert_eq!(error_code(&reply), "invalid_input");
    h.finish().await.unwrap();
}

#[tokio::test]
async fn test_unknown_payload_is_ignored() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.send(empty_request("?")).await;
    h.assert_no_reply().await;
    h.join("s1", "u1", "camera").await;
    h.finish().await.unwrap();
}

// ============================================================================
// Negotiator callbacks
// ============================================================================

#[tokio::test]
async fn test_callbacks_follow_join_reply() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new().with_offer_on_join("v=0 subscriber offer");
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "d1", "director").await;

    // Offer emitted during join arrives after the join reply
    let offer = h.recv().await;
    assert!(offer.id.is_empty());
    let Some(signal_reply::Payload::Description(desc)) = offer.payload else {
        panic!("expected forwarded offer");
    };
    assert_eq!(desc.r#type, "offer");
    assert_eq!(desc.sdp, "v=0 subscriber offer");

    let peer = negotiators.peer(0).unwrap();
    assert!(
        peer.emit(NegotiatorEvent::IceCandidate {
            candidate: sample_candidate(),
            target: Target::Subscriber,
        })
        .await
    );
    let candidate = h.recv().await;
    let Some(signal_reply::Payload::Trickle(t)) = candidate.payload else {
        panic!("expected forwarded candidate");
    };
    assert_eq!(t.target, i32::from(trickle::Target::Subscriber));
    let decoded: signaling_service::media::IceCandidateInit =
        serde_json::from_str(&t.init).unwrap();
    assert_eq!(decoded, sample_candidate());

    h.finish().await.unwrap();
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_clean_close_removes_peer() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    let peer_id = h.join("s1", "u1", "camera").await;
    let mut state = h.state.clone();
    h.finish().await.unwrap();

    assert!(matches!(
        store.get_peer(&peer_id).await,
        Err(signaling_service::errors::StoreError::PeerNotFound)
    ));
    assert_eq!(negotiators.peer(0).unwrap().record().close_count, 1);
    state.wait_for(|s| *s == ConnectionState::Closed).await.unwrap();
}

#[tokio::test]
async fn test_cancellation_marks_peer_disconnected() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    let peer_id = h.join("s1", "u1", "camera").await;
    h.cancel.cancel();
    let result = h.task.await.unwrap();

    assert!(matches!(result, Err(SignalingError::Cancelled)));
    assert_eq!(store.peer_status(&peer_id), Some(PeerStatus::Disconnected));
    assert!(negotiators.peer(0).unwrap().is_closed());
    assert_eq!(*h.state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_transport_error_marks_peer_disconnected() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    let peer_id = h.join("s1", "u1", "camera").await;
    h.inbound
        .as_ref()
        .unwrap()
        .send(Err(Status::unavailable("connection reset")))
        .await
        .unwrap();
    let result = h.task.await.unwrap();

    assert!(matches!(result, Err(SignalingError::Transport(_))));
    assert_eq!(store.peer_status(&peer_id), Some(PeerStatus::Disconnected));
    assert_eq!(negotiators.peer(0).unwrap().record().close_count, 1);
}

#[tokio::test]
async fn test_close_before_join_touches_nothing() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let h = Harness::start(&store, &negotiators);

    h.finish().await.unwrap();
    assert!(store.calls().is_empty());
    assert_eq!(negotiators.created(), 0);
}

#[tokio::test]
async fn test_callbacks_stop_after_close() {
    let store = store_with(TestSession::new("s1"));
    let negotiators = MockNegotiatorFactory::new();
    let mut h = Harness::start(&store, &negotiators);

    h.join("s1", "u1", "camera").await;
    let peer = negotiators.peer(0).unwrap();
    h.finish().await.unwrap();

    assert!(
        !peer
            .emit(NegotiatorEvent::Offer(
                signaling_service::media::SessionDescription::offer("v=0")
            ))
            .await
    );
}

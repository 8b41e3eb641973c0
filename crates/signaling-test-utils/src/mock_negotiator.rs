//! Scriptable negotiation peers for signaling session tests.
//!
//! [`MockNegotiatorFactory`] hands out [`MockPeer`]s that record every call
//! and can emit callbacks on demand, without a media engine.
//!
//! # Example
//!
//! ```rust,ignore
//! let negotiators = MockNegotiatorFactory::new()
//!     .with_answer_sdp("v=0 answer")
//!     .with_offer_on_join("v=0 subscriber offer");
//!
//! // ... drive a SignalingSession ...
//!
//! let peer = negotiators.peer(0).unwrap();
//! assert_eq!(peer.record().close_count, 1);
//! ```

use async_trait::async_trait;
use signaling_service::media::{
    IceCandidateInit, JoinConfig, NegotiationError, NegotiationPeer, NegotiatorEvent,
    NegotiatorFactory, SessionDescription, Target,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Answer SDP returned when none is configured.
pub const DEFAULT_ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock-answer\r\nt=0 0\r\n";

/// Which step of the negotiation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailAt {
    #[default]
    Never,
    Create,
    Join,
    Answer,
    Trickle,
    RemoteDescription,
}

/// Everything a mock peer was asked to do.
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub joined: Option<(String, String, JoinConfig)>,
    pub answered: Vec<SessionDescription>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub trickles: Vec<(IceCandidateInit, Target)>,
    pub close_count: usize,
}

#[derive(Debug)]
struct PeerState {
    record: PeerRecord,
    events: Option<mpsc::Sender<NegotiatorEvent>>,
}

/// Handle on one created peer, usable after the session dropped it.
#[derive(Debug, Clone)]
pub struct MockPeerHandle {
    state: Arc<Mutex<PeerState>>,
}

impl MockPeerHandle {
    /// Snapshot of the recorded calls.
    pub fn record(&self) -> PeerRecord {
        self.state.lock().unwrap().record.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().record.close_count > 0
    }

    /// Emit a callback as the media engine would. Returns false once the
    /// peer is closed or the receiver is gone.
    pub async fn emit(&self, event: NegotiatorEvent) -> bool {
        let sender = self.state.lock().unwrap().events.clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    answer_sdp: Option<String>,
    offer_on_join: Option<String>,
    fail_at: FailAt,
    peers: Vec<MockPeerHandle>,
}

/// Factory for mock negotiation peers.
#[derive(Debug, Clone, Default)]
pub struct MockNegotiatorFactory {
    inner: Arc<Mutex<FactoryInner>>,
}

impl MockNegotiatorFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SDP body of every answer.
    #[must_use]
    pub fn with_answer_sdp(self, sdp: impl Into<String>) -> Self {
        self.inner.lock().unwrap().answer_sdp = Some(sdp.into());
        self
    }

    /// Emit a subscriber offer right after `join`, like a real engine whose
    /// subscriber leg needs negotiation.
    #[must_use]
    pub fn with_offer_on_join(self, sdp: impl Into<String>) -> Self {
        self.inner.lock().unwrap().offer_on_join = Some(sdp.into());
        self
    }

    #[must_use]
    pub fn failing_at(self, step: FailAt) -> Self {
        self.inner.lock().unwrap().fail_at = step;
        self
    }

    /// Number of peers created so far.
    pub fn created(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    /// The `index`-th created peer.
    pub fn peer(&self, index: usize) -> Option<MockPeerHandle> {
        self.inner.lock().unwrap().peers.get(index).cloned()
    }
}

#[async_trait]
impl NegotiatorFactory for MockNegotiatorFactory {
    async fn create(
        &self,
        events: mpsc::Sender<NegotiatorEvent>,
    ) -> Result<Box<dyn NegotiationPeer>, NegotiationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_at == FailAt::Create {
            return Err(NegotiationError::Engine("mock create failure".to_string()));
        }

        let handle = MockPeerHandle {
            state: Arc::new(Mutex::new(PeerState {
                record: PeerRecord::default(),
                events: Some(events),
            })),
        };
        inner.peers.push(handle.clone());

        Ok(Box::new(MockPeer {
            handle,
            answer_sdp: inner
                .answer_sdp
                .clone()
                .unwrap_or_else(|| DEFAULT_ANSWER_SDP.to_string()),
            offer_on_join: inner.offer_on_join.clone(),
            fail_at: inner.fail_at,
        }))
    }
}

/// Peer handed to the session.
pub struct MockPeer {
    handle: MockPeerHandle,
    answer_sdp: String,
    offer_on_join: Option<String>,
    fail_at: FailAt,
}

impl MockPeer {
    fn fail(&self, step: FailAt) -> Result<(), NegotiationError> {
        if self.fail_at == step {
            return Err(NegotiationError::Engine(format!("mock {step:?} failure")));
        }
        if self.handle.is_closed() {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationPeer for MockPeer {
    async fn join(
        &self,
        session_id: &str,
        user_id: &str,
        config: JoinConfig,
    ) -> Result<(), NegotiationError> {
        self.fail(FailAt::Join)?;
        self.handle.state.lock().unwrap().record.joined =
            Some((session_id.to_string(), user_id.to_string(), config));

        if let Some(sdp) = &self.offer_on_join {
            if !config.no_subscribe {
                self.handle
                    .emit(NegotiatorEvent::Offer(SessionDescription::offer(sdp.clone())))
                    .await;
            }
        }
        Ok(())
    }

    async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.fail(FailAt::Answer)?;
        let mut state = self.handle.state.lock().unwrap();
        if state.record.joined.is_none() {
            return Err(NegotiationError::NotJoined);
        }
        state.record.answered.push(offer);
        Ok(SessionDescription::answer(self.answer_sdp.clone()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.fail(FailAt::RemoteDescription)?;
        self.handle
            .state
            .lock()
            .unwrap()
            .record
            .remote_descriptions
            .push(description);
        Ok(())
    }

    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), NegotiationError> {
        self.fail(FailAt::Trickle)?;
        self.handle
            .state
            .lock()
            .unwrap()
            .record
            .trickles
            .push((candidate, target));
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.handle.state.lock().unwrap();
        state.record.close_count += 1;
        state.events = None;
    }
}

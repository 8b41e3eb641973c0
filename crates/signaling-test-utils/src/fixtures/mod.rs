//! Pre-configured test data for signaling tests.
//!
//! Provides builders and sample payloads for:
//! - Sessions and peers
//! - SDP offers and ICE candidates
//! - `SignalRequest` messages

use chrono::{DateTime, Utc};
use proto_gen::signaling::{self as pb, signal_request, trickle, SignalRequest};
use signaling_service::media::{IceCandidateInit, Target};
use signaling_service::models::{Peer, PeerStatus, Session, SessionStatus};
use signaling_service::permissions::ROLE_CAMERA;
use uuid::Uuid;

/// Minimal offer SDP. The mock negotiator never parses it.
pub const SAMPLE_OFFER_SDP: &str =
    "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// A host candidate as a browser would send it.
#[must_use]
pub fn sample_candidate() -> IceCandidateInit {
    IceCandidateInit {
        candidate: "candidate:842163049 1 udp 1677729535 192.0.2.10 54400 typ srflx".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: Some("f00d".to_string()),
    }
}

/// [`sample_candidate`] encoded for a trickle message.
#[must_use]
pub fn sample_candidate_json() -> String {
    serde_json::to_string(&sample_candidate()).unwrap()
}

/// Test session fixture.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub id: String,
    pub room_code: String,
    pub max_peers: u32,
    pub status: SessionStatus,
}

impl TestSession {
    /// Active session with room code `ABC123` and room for 10 peers.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            room_code: "ABC123".to_string(),
            max_peers: 10,
            status: SessionStatus::Active,
        }
    }

    /// Session with a random id and a random room code.
    #[must_use]
    pub fn random() -> Self {
        let mut session = Self::new(format!("session-{}", Uuid::new_v4()));
        session.room_code = random_room_code();
        session
    }

    #[must_use]
    pub fn with_room_code(mut self, code: impl Into<String>) -> Self {
        self.room_code = code.into();
        self
    }

    #[must_use]
    pub fn with_max_peers(mut self, max: u32) -> Self {
        self.max_peers = max;
        self
    }

    #[must_use]
    pub fn closed(mut self) -> Self {
        self.status = SessionStatus::Closed;
        self
    }

    #[must_use]
    pub fn build(&self) -> Session {
        let mut session = Session::new(self.id.clone(), self.room_code.clone(), self.max_peers);
        session.status = self.status;
        session
    }
}

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: Option<DateTime<Utc>>,
}

impl TestPeer {
    /// Camera peer with a random id.
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: format!("peer-{}", Uuid::new_v4()),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role: ROLE_CAMERA.to_string(),
            joined_at: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Fix the join time (for ordering tests).
    #[must_use]
    pub fn joined_at(mut self, at: DateTime<Utc>) -> Self {
        self.joined_at = Some(at);
        self
    }

    #[must_use]
    pub fn build(&self) -> Peer {
        let mut peer = Peer::new(
            self.id.clone(),
            self.session_id.clone(),
            self.user_id.clone(),
            self.role.clone(),
        );
        if let Some(at) = self.joined_at {
            peer.joined_at = at;
        }
        peer.status = PeerStatus::Connected;
        peer
    }
}

/// Six characters from the room-code alphabet, derived from a UUID.
#[must_use]
pub fn random_room_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(6)
        .map(|b| ALPHABET[usize::from(*b) % ALPHABET.len()] as char)
        .collect()
}

// ============================================================================
// Signal requests
// ============================================================================

fn request(id: &str, payload: signal_request::Payload) -> SignalRequest {
    SignalRequest {
        id: id.to_string(),
        payload: Some(payload),
    }
}

/// Join with an offer.
#[must_use]
pub fn join_request(id: &str, session_id: &str, user_id: &str, role: &str) -> SignalRequest {
    request(
        id,
        signal_request::Payload::Join(pb::JoinRequest {
            sid: session_id.to_string(),
            uid: user_id.to_string(),
            role: role.to_string(),
            description: Some(pb::SessionDescription {
                r#type: "offer".to_string(),
                sdp: SAMPLE_OFFER_SDP.to_string(),
            }),
        }),
    )
}

/// Join without a description.
#[must_use]
pub fn join_request_without_offer(
    id: &str,
    session_id: &str,
    user_id: &str,
    role: &str,
) -> SignalRequest {
    let mut req = join_request(id, session_id, user_id, role);
    if let Some(signal_request::Payload::Join(join)) = req.payload.as_mut() {
        join.description = None;
    }
    req
}

/// Trickle of [`sample_candidate`] on `target`.
#[must_use]
pub fn trickle_request(id: &str, target: Target) -> SignalRequest {
    let target = match target {
        Target::Publisher => trickle::Target::Publisher,
        Target::Subscriber => trickle::Target::Subscriber,
    };
    request(
        id,
        signal_request::Payload::Trickle(pb::Trickle {
            target: target.into(),
            init: sample_candidate_json(),
        }),
    )
}

/// Trickle with an arbitrary payload.
#[must_use]
pub fn raw_trickle_request(id: &str, target: i32, init: &str) -> SignalRequest {
    request(
        id,
        signal_request::Payload::Trickle(pb::Trickle {
            target,
            init: init.to_string(),
        }),
    )
}

/// Standalone description.
#[must_use]
pub fn description_request(id: &str, sdp_type: &str, sdp: &str) -> SignalRequest {
    request(
        id,
        signal_request::Payload::Description(pb::SessionDescription {
            r#type: sdp_type.to_string(),
            sdp: sdp.to_string(),
        }),
    )
}

/// Request with no payload.
#[must_use]
pub fn empty_request(id: &str) -> SignalRequest {
    SignalRequest {
        id: id.to_string(),
        payload: None,
    }
}

//! Media negotiation collaborator.
//!
//! The relay never looks inside SDP or ICE payloads. It hands them to a
//! [`NegotiationPeer`] (one per joined client) and streams the peer's
//! callbacks back to the client as [`NegotiatorEvent`]s.
//!
//! Each client gets two legs: the publisher leg carries media from the client
//! (client offers, relay answers) and the subscriber leg carries media to the
//! client (relay offers, client answers).

pub mod rtc;

pub use rtc::RtcNegotiatorFactory;

use crate::errors::SignalingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

/// Which peer connection a candidate or description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Publisher,
    Subscriber,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Publisher => "publisher",
            Target::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl FromStr for SdpType {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            other => Err(NegotiationError::InvalidDescription(format!(
                "unsupported description type {other:?}"
            ))),
        }
    }
}

/// An SDP offer or answer. The body is opaque to the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

// SDP bodies carry ICE credentials and fingerprints; keep them out of logs.
impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("sdp_type", &self.sdp_type)
            .field("sdp_len", &self.sdp.len())
            .finish()
    }
}

/// Browser `RTCIceCandidateInit`, exchanged as JSON in trickle messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Which legs a joining peer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinConfig {
    pub no_publish: bool,
    pub no_subscribe: bool,
}

/// Callback from a negotiation peer, delivered on the events channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatorEvent {
    /// A local ICE candidate was gathered.
    IceCandidate {
        candidate: IceCandidateInit,
        target: Target,
    },
    /// The subscriber leg needs renegotiation.
    Offer(SessionDescription),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error("negotiation peer has not joined")]
    NotJoined,

    #[error("negotiation peer is closed")]
    Closed,

    #[error("media engine error: {0}")]
    Engine(String),
}

impl From<NegotiationError> for SignalingError {
    fn from(err: NegotiationError) -> Self {
        match err {
            // A description the engine cannot parse came from the client
            NegotiationError::InvalidDescription(reason) => SignalingError::InvalidArgument(reason),
            other => SignalingError::Negotiation(other.to_string()),
        }
    }
}

/// One client's negotiation state inside the media engine.
#[async_trait]
pub trait NegotiationPeer: Send + Sync {
    /// Bind the peer to a session; must precede `answer`.
    async fn join(
        &self,
        session_id: &str,
        user_id: &str,
        config: JoinConfig,
    ) -> Result<(), NegotiationError>;

    /// Answer a publisher-leg offer.
    async fn answer(&self, offer: SessionDescription)
        -> Result<SessionDescription, NegotiationError>;

    /// Apply a remote description: an answer lands on the subscriber leg,
    /// an offer on the publisher leg.
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    /// Add a remote ICE candidate to one leg.
    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), NegotiationError>;

    /// Release all media resources. Safe to call more than once.
    async fn close(&self);
}

/// Creates a negotiation peer per joining client.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    /// Callbacks of the new peer are sent on `events` until it is closed.
    async fn create(
        &self,
        events: mpsc::Sender<NegotiatorEvent>,
    ) -> Result<Box<dyn NegotiationPeer>, NegotiationError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let init: IceCandidateInit = serde_json::from_str(json).unwrap();

        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(init.sdp_mline_index, Some(0));
        assert_eq!(init.username_fragment.as_deref(), Some("abcd"));
        assert_eq!(serde_json::to_string(&init).unwrap(), json);
    }

    #[test]
    fn test_candidate_optional_fields_may_be_missing() {
        let init: IceCandidateInit = serde_json::from_str(r#"{"candidate":""}"#).unwrap();
        assert_eq!(init, IceCandidateInit::default());
    }

    #[test]
    fn test_candidate_without_candidate_field_is_rejected() {
        assert!(serde_json::from_str::<IceCandidateInit>(r#"{"sdpMid":"0"}"#).is_err());
        assert!(serde_json::from_str::<IceCandidateInit>("not json").is_err());
    }

    #[test]
    fn test_sdp_type_parsing() {
        assert_eq!("offer".parse::<SdpType>().unwrap(), SdpType::Offer);
        assert_eq!("answer".parse::<SdpType>().unwrap(), SdpType::Answer);
        assert!("pranswer".parse::<SdpType>().is_err());
    }

    #[test]
    fn test_description_debug_hides_sdp() {
        let desc = SessionDescription::offer("v=0\r\na=ice-pwd:supersecret\r\n");
        assert!(!format!("{desc:?}").contains("supersecret"));
    }
}

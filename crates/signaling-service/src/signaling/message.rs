//! Wire message decoding and encoding for the signaling stream.
//!
//! Inbound `SignalRequest`s become [`SignalMessage`]s. Outbound replies are
//! built by the `*_reply` helpers so every reply carries the request id the
//! same way.

use crate::errors::SignalingError;
use crate::media::{IceCandidateInit, NegotiatorEvent, SessionDescription, Target};
use proto_gen::signaling::{
    self as pb, signal_reply, signal_request, trickle, SignalReply, SignalRequest,
};

/// Join parameters as received; validated by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinParams {
    pub session_id: String,
    pub user_id: String,
    pub role: String,
    /// Raw description; checked for type and body during join.
    pub offer: Option<RawDescription>,
}

/// Trickle parameters as received. `target` is `None` for values outside the
/// wire enum; `init` is still JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrickleParams {
    pub target: Option<Target>,
    pub init: String,
}

/// A description whose type string has not been checked yet.
#[derive(Clone, PartialEq, Eq)]
pub struct RawDescription {
    pub sdp_type: String,
    pub sdp: String,
}

impl std::fmt::Debug for RawDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDescription")
            .field("sdp_type", &self.sdp_type)
            .field("sdp_len", &self.sdp.len())
            .finish()
    }
}

impl RawDescription {
    /// Check the type and require a non-empty body.
    pub fn parse(self) -> Result<SessionDescription, SignalingError> {
        let sdp_type = self
            .sdp_type
            .parse()
            .map_err(|_| SignalingError::InvalidArgument(format!(
                "description type must be \"offer\" or \"answer\", got {:?}",
                self.sdp_type
            )))?;
        if self.sdp.trim().is_empty() {
            return Err(SignalingError::InvalidArgument(
                "description sdp is empty".to_string(),
            ));
        }
        Ok(SessionDescription {
            sdp_type,
            sdp: self.sdp,
        })
    }
}

impl From<pb::SessionDescription> for RawDescription {
    fn from(desc: pb::SessionDescription) -> Self {
        Self {
            sdp_type: desc.r#type,
            sdp: desc.sdp,
        }
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Join(JoinParams),
    Trickle(TrickleParams),
    Description(RawDescription),
    /// Payload missing or of a kind this relay does not know.
    Unknown,
}

impl SignalMessage {
    /// Metric label for this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Join(_) => "join",
            SignalMessage::Trickle(_) => "trickle",
            SignalMessage::Description(_) => "description",
            SignalMessage::Unknown => "unknown",
        }
    }
}

impl From<SignalRequest> for SignalMessage {
    fn from(request: SignalRequest) -> Self {
        match request.payload {
            Some(signal_request::Payload::Join(join)) => SignalMessage::Join(JoinParams {
                session_id: join.sid,
                user_id: join.uid,
                role: join.role,
                offer: join.description.map(RawDescription::from),
            }),
            Some(signal_request::Payload::Trickle(t)) => SignalMessage::Trickle(TrickleParams {
                target: target_from_wire(t.target),
                init: t.init,
            }),
            Some(signal_request::Payload::Description(desc)) => {
                SignalMessage::Description(desc.into())
            }
            None => SignalMessage::Unknown,
        }
    }
}

fn target_from_wire(value: i32) -> Option<Target> {
    match trickle::Target::try_from(value).ok()? {
        trickle::Target::Publisher => Some(Target::Publisher),
        trickle::Target::Subscriber => Some(Target::Subscriber),
    }
}

fn target_to_wire(target: Target) -> trickle::Target {
    match target {
        Target::Publisher => trickle::Target::Publisher,
        Target::Subscriber => trickle::Target::Subscriber,
    }
}

impl From<SessionDescription> for pb::SessionDescription {
    fn from(desc: SessionDescription) -> Self {
        Self {
            r#type: desc.sdp_type.as_str().to_string(),
            sdp: desc.sdp,
        }
    }
}

fn reply(id: impl Into<String>, payload: signal_reply::Payload) -> SignalReply {
    SignalReply {
        id: id.into(),
        payload: Some(payload),
    }
}

/// Reply to a successful join.
pub fn join_reply(id: &str, answer: SessionDescription, peer_id: &str) -> SignalReply {
    reply(
        id,
        signal_reply::Payload::Join(pb::JoinReply {
            description: Some(answer.into()),
            peer_id: peer_id.to_string(),
        }),
    )
}

/// A description pushed to the client: an answer to its offer, or an offer
/// from the negotiator (empty id).
pub fn description_reply(id: &str, description: SessionDescription) -> SignalReply {
    reply(id, signal_reply::Payload::Description(description.into()))
}

/// Error reply with a client-safe message.
pub fn error_reply(id: &str, err: &SignalingError) -> SignalReply {
    reply(
        id,
        signal_reply::Payload::Error(pb::SignalError {
            code: err.kind().as_str().to_string(),
            message: err.client_message(),
        }),
    )
}

/// Encode a negotiator callback for the client.
pub fn event_reply(event: NegotiatorEvent) -> Result<SignalReply, serde_json::Error> {
    match event {
        NegotiatorEvent::IceCandidate { candidate, target } => Ok(reply(
            "",
            signal_reply::Payload::Trickle(pb::Trickle {
                target: target_to_wire(target).into(),
                init: serde_json::to_string(&candidate)?,
            }),
        )),
        NegotiatorEvent::Offer(offer) => Ok(description_reply("", offer)),
    }
}

/// Decode the JSON candidate carried by a trickle.
pub fn decode_candidate(init: &str) -> Result<IceCandidateInit, serde_json::Error> {
    serde_json::from_str(init)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::media::SdpType;

    fn request(payload: signal_request::Payload) -> SignalRequest {
        SignalRequest {
            id: "1".to_string(),
            payload: Some(payload),
        }
    }

    #[test]
    fn test_join_decodes_all_fields() {
        let message = SignalMessage::from(request(signal_request::Payload::Join(
            pb::JoinRequest {
                sid: "s1".to_string(),
                uid: "u1".to_string(),
                role: "camera".to_string(),
                description: Some(pb::SessionDescription {
                    r#type: "offer".to_string(),
                    sdp: "v=0".to_string(),
                }),
            },
        )));

        let SignalMessage::Join(join) = message else {
            panic!("expected join");
        };
        assert_eq!(join.session_id, "s1");
        assert_eq!(join.role, "camera");
        let offer = join.offer.unwrap().parse().unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
    }

    #[test]
    fn test_missing_payload_is_unknown() {
        let message = SignalMessage::from(SignalRequest {
            id: "1".to_string(),
            payload: None,
        });
        assert_eq!(message, SignalMessage::Unknown);
        assert_eq!(message.kind(), "unknown");
    }

    #[test]
    fn test_out_of_range_target_decodes_as_none() {
        let message = SignalMessage::from(request(signal_request::Payload::Trickle(pb::Trickle {
            target: 7,
            init: "{}".to_string(),
        })));
        assert_eq!(
            message,
            SignalMessage::Trickle(TrickleParams {
                target: None,
                init: "{}".to_string()
            })
        );
    }

    #[test]
    fn test_raw_description_validation() {
        let bad_type = RawDescription {
            sdp_type: "rollback".to_string(),
            sdp: "v=0".to_string(),
        };
        assert!(matches!(bad_type.parse(), Err(SignalingError::InvalidArgument(_))));

        let empty = RawDescription {
            sdp_type: "answer".to_string(),
            sdp: "  ".to_string(),
        };
        assert!(matches!(empty.parse(), Err(SignalingError::InvalidArgument(_))));
    }

    #[test]
    fn test_candidate_event_encodes_json_and_target() {
        let event = NegotiatorEvent::IceCandidate {
            candidate: IceCandidateInit {
                candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
            target: Target::Subscriber,
        };

        let reply = event_reply(event).unwrap();
        assert!(reply.id.is_empty());
        let Some(signal_reply::Payload::Trickle(t)) = reply.payload else {
            panic!("expected trickle");
        };
        assert_eq!(t.target, i32::from(trickle::Target::Subscriber));
        let decoded = decode_candidate(&t.init).unwrap();
        assert_eq!(decoded.sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_error_reply_uses_kind_and_client_message() {
        let reply = error_reply("9", &SignalingError::UnknownRole("admin".to_string()));
        assert_eq!(reply.id, "9");
        let Some(signal_reply::Payload::Error(err)) = reply.payload else {
            panic!("expected error");
        };
        assert_eq!(err.code, "invalid_input");
        assert!(err.message.contains("admin"));
    }
}

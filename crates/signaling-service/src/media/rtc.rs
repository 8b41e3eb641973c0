//! In-process negotiator built on `webrtc`.
//!
//! Each client gets a publisher and a subscriber `RTCPeerConnection`. Local
//! ICE candidates and subscriber renegotiation offers are pushed onto the
//! client's events channel from the engine's callback tasks.

use super::{
    IceCandidateInit, JoinConfig, NegotiationError, NegotiationPeer, NegotiatorEvent,
    NegotiatorFactory, SdpType, SessionDescription, Target,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Label of the data channel opened on the subscriber leg at join. Opening
/// it triggers the first subscriber offer.
const SUBSCRIBER_CHANNEL_LABEL: &str = "signaling";

fn engine_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::Engine(e.to_string())
}

/// Builds publisher/subscriber peer-connection pairs.
pub struct RtcNegotiatorFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl RtcNegotiatorFactory {
    /// Create a factory with the default codecs and interceptors.
    ///
    /// `ice_servers` are STUN/TURN URLs handed to every peer connection.
    pub fn new(ice_servers: Vec<String>) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_error)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(engine_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl NegotiatorFactory for RtcNegotiatorFactory {
    async fn create(
        &self,
        events: mpsc::Sender<NegotiatorEvent>,
    ) -> Result<Box<dyn NegotiationPeer>, NegotiationError> {
        let publisher = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(engine_error)?,
        );
        let subscriber = match self.api.new_peer_connection(self.configuration()).await {
            Ok(pc) => Arc::new(pc),
            Err(e) => {
                if let Err(close_err) = publisher.close().await {
                    debug!(target: "sig.media.rtc", error = %close_err, "Failed to close publisher after setup error");
                }
                return Err(engine_error(e));
            }
        };

        forward_ice_candidates(&publisher, Target::Publisher, events.clone());
        forward_ice_candidates(&subscriber, Target::Subscriber, events.clone());
        forward_subscriber_offers(&subscriber, events);

        Ok(Box::new(RtcPeer {
            publisher,
            subscriber,
            join_config: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

fn forward_ice_candidates(
    pc: &Arc<RTCPeerConnection>,
    target: Target,
    events: mpsc::Sender<NegotiatorEvent>,
) {
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => {
                    let event = NegotiatorEvent::IceCandidate {
                        candidate: init.into(),
                        target,
                    };
                    if events.send(event).await.is_err() {
                        debug!(target: "sig.media.rtc", leg = %target, "Events channel closed, candidate not delivered");
                    }
                }
                Err(e) => {
                    warn!(target: "sig.media.rtc", error = %e, leg = %target, "Failed to encode local ICE candidate");
                }
            }
        })
    }));
}

fn forward_subscriber_offers(
    subscriber: &Arc<RTCPeerConnection>,
    events: mpsc::Sender<NegotiatorEvent>,
) {
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(subscriber);
    subscriber.on_negotiation_needed(Box::new(move || {
        let weak = weak.clone();
        let events = events.clone();
        Box::pin(async move {
            let Some(pc) = weak.upgrade() else { return };
            match create_local_offer(&pc).await {
                Ok(offer) => {
                    if events.send(NegotiatorEvent::Offer(offer)).await.is_err() {
                        debug!(target: "sig.media.rtc", "Events channel closed, offer not delivered");
                    }
                }
                Err(e) => {
                    warn!(target: "sig.media.rtc", error = %e, "Subscriber renegotiation failed");
                }
            }
        })
    }));
}

async fn create_local_offer(
    pc: &RTCPeerConnection,
) -> Result<SessionDescription, NegotiationError> {
    let offer = pc.create_offer(None).await.map_err(engine_error)?;
    let sdp = offer.sdp.clone();
    pc.set_local_description(offer).await.map_err(engine_error)?;
    Ok(SessionDescription::offer(sdp))
}

impl From<RTCIceCandidateInit> for IceCandidateInit {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidateInit> for RTCIceCandidateInit {
    fn from(init: IceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

fn to_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| NegotiationError::InvalidDescription(e.to_string()))
}

struct RtcPeer {
    publisher: Arc<RTCPeerConnection>,
    subscriber: Arc<RTCPeerConnection>,
    join_config: Mutex<Option<JoinConfig>>,
    closed: AtomicBool,
}

impl RtcPeer {
    fn leg(&self, target: Target) -> &RTCPeerConnection {
        match target {
            Target::Publisher => &self.publisher,
            Target::Subscriber => &self.subscriber,
        }
    }

    async fn ensure_joined(&self) -> Result<JoinConfig, NegotiationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NegotiationError::Closed);
        }
        (*self.join_config.lock().await).ok_or(NegotiationError::NotJoined)
    }
}

#[async_trait]
impl NegotiationPeer for RtcPeer {
    async fn join(
        &self,
        session_id: &str,
        user_id: &str,
        config: JoinConfig,
    ) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NegotiationError::Closed);
        }

        {
            let mut join_config = self.join_config.lock().await;
            if join_config.is_some() {
                return Err(NegotiationError::Engine("peer already joined".to_string()));
            }
            *join_config = Some(config);
        }

        if !config.no_subscribe {
            self.subscriber
                .create_data_channel(SUBSCRIBER_CHANNEL_LABEL, None)
                .await
                .map_err(engine_error)?;
        }

        debug!(
            target: "sig.media.rtc",
            session_id = %session_id,
            user_id = %user_id,
            no_publish = config.no_publish,
            no_subscribe = config.no_subscribe,
            "Negotiation peer joined"
        );
        Ok(())
    }

    async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_joined().await?;
        if offer.sdp_type != SdpType::Offer {
            return Err(NegotiationError::InvalidDescription(
                "expected an offer".to_string(),
            ));
        }

        self.publisher
            .set_remote_description(to_rtc_description(offer)?)
            .await
            .map_err(engine_error)?;
        let answer = self
            .publisher
            .create_answer(None)
            .await
            .map_err(engine_error)?;
        let sdp = answer.sdp.clone();
        self.publisher
            .set_local_description(answer)
            .await
            .map_err(engine_error)?;

        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_joined().await?;
        let target = match description.sdp_type {
            SdpType::Offer => Target::Publisher,
            SdpType::Answer => Target::Subscriber,
        };
        self.leg(target)
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(engine_error)
    }

    async fn trickle(
        &self,
        candidate: IceCandidateInit,
        target: Target,
    ) -> Result<(), NegotiationError> {
        self.ensure_joined().await?;
        self.leg(target)
            .add_ice_candidate(candidate.into())
            .await
            .map_err(engine_error)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for target in [Target::Publisher, Target::Subscriber] {
            if let Err(e) = self.leg(target).close().await {
                warn!(target: "sig.media.rtc", error = %e, leg = %target, "Failed to close peer connection");
            }
        }
    }
}

//! `SignalingSession` - per-stream signaling state machine.
//!
//! Each session:
//! - Handles exactly one client stream
//! - Moves `Connected` -> `Joined` -> `Closed`, never back to `Connected`
//! - Processes inbound messages strictly in order
//! - Forwards negotiator callbacks to the client from a separate task
//!
//! # Outbound path
//!
//! Replies and forwarded callbacks share one `mpsc` sender. The receiving
//! end is the gRPC response stream, so there is a single writer per client.
//!
//! # Termination
//!
//! A clean end of stream removes the peer from the store (explicit leave).
//! A transport error or cancellation marks it `disconnected` and leaves the
//! record to TTL expiry. The negotiation peer is closed on every exit path.

use super::message::{
    self, JoinParams, RawDescription, SignalMessage, TrickleParams,
};
use crate::errors::{SignalingError, StoreError};
use crate::media::{
    JoinConfig, NegotiationPeer, NegotiatorEvent, NegotiatorFactory, SdpType, SessionDescription,
    Target,
};
use crate::models::{Peer, PeerStatus};
use crate::observability::metrics;
use crate::permissions::{permissions_for_role, PermissionGrant};
use crate::store::SessionStore;
use futures::{Stream, StreamExt};
use proto_gen::signaling::{SignalReply, SignalRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Buffer for negotiator callbacks waiting to be forwarded.
pub const NEGOTIATOR_EVENT_BUFFER: usize = 64;

/// Sender half of a client's response stream.
pub type OutboundSender = mpsc::Sender<Result<SignalReply, Status>>;

/// Protocol state of one client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Joined,
    Closed,
}

/// State held once a join succeeded.
struct JoinedPeer {
    peer_id: String,
    session_id: String,
    grant: PermissionGrant,
    negotiation: Box<dyn NegotiationPeer>,
    forwarder: JoinHandle<()>,
    forwarder_token: CancellationToken,
}

impl JoinedPeer {
    fn allows(&self, target: Target) -> bool {
        match target {
            Target::Publisher => self.grant.can_publish,
            Target::Subscriber => self.grant.can_subscribe,
        }
    }
}

/// One client's signaling session.
pub struct SignalingSession {
    connection_id: String,
    store: Arc<dyn SessionStore>,
    negotiators: Arc<dyn NegotiatorFactory>,
    outbound: OutboundSender,
    cancel_token: CancellationToken,
    state: watch::Sender<ConnectionState>,
    joined: Option<JoinedPeer>,
}

impl SignalingSession {
    /// Create a session in state `Connected`.
    ///
    /// `cancel_token` should be a child of the service token so shutdown
    /// reaches every open stream.
    pub fn new(
        store: Arc<dyn SessionStore>,
        negotiators: Arc<dyn NegotiatorFactory>,
        outbound: OutboundSender,
        cancel_token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            connection_id: Uuid::new_v4().to_string(),
            store,
            negotiators,
            outbound,
            cancel_token,
            state,
            joined: None,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions, including after `run` consumed the session.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Drive the session until the inbound stream ends, fails, or the
    /// session is cancelled.
    ///
    /// # Errors
    ///
    /// `Transport` if the stream failed, `Cancelled` on shutdown. A clean
    /// end of stream returns `Ok`.
    #[instrument(
        skip_all,
        name = "sig.signaling.session",
        fields(connection_id = %self.connection_id)
    )]
    pub async fn run<S>(mut self, mut inbound: S) -> Result<(), SignalingError>
    where
        S: Stream<Item = Result<SignalRequest, Status>> + Unpin + Send,
    {
        metrics::connection_opened();
        debug!(
            target: "sig.signaling.session",
            connection_id = %self.connection_id,
            "Signaling session started"
        );

        let result = self.receive_loop(&mut inbound).await;
        self.release(result.is_ok()).await;
        metrics::connection_closed();

        match &result {
            Ok(()) => debug!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                "Signaling session closed"
            ),
            Err(e) => info!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                error = %e,
                "Signaling session ended"
            ),
        }
        result
    }

    async fn receive_loop<S>(&mut self, inbound: &mut S) -> Result<(), SignalingError>
    where
        S: Stream<Item = Result<SignalRequest, Status>> + Unpin + Send,
    {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sig.signaling.session",
                        connection_id = %self.connection_id,
                        "Signaling session received cancellation signal"
                    );
                    return Err(SignalingError::Cancelled);
                }

                next = inbound.next() => match next {
                    Some(Ok(request)) => self.handle_request(request).await,
                    Some(Err(status)) => {
                        return Err(SignalingError::Transport(status.message().to_string()));
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_request(&mut self, request: SignalRequest) {
        let id = request.id.clone();
        let message = SignalMessage::from(request);
        let kind = message.kind();
        metrics::record_message(kind);

        let result = match message {
            SignalMessage::Join(join) => self.handle_join(&id, join).await,
            SignalMessage::Trickle(trickle) => {
                self.handle_trickle(trickle).await;
                Ok(())
            }
            SignalMessage::Description(description) => {
                self.handle_description(&id, description).await
            }
            SignalMessage::Unknown => {
                warn!(
                    target: "sig.signaling.session",
                    connection_id = %self.connection_id,
                    "Ignoring message with unknown payload"
                );
                metrics::record_message_error(kind);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                kind,
                error = %e,
                "Signaling message failed"
            );
            metrics::record_message_error(kind);
            self.send(message::error_reply(&id, &e)).await;
        }
    }

    async fn handle_join(&mut self, id: &str, join: JoinParams) -> Result<(), SignalingError> {
        let start = Instant::now();
        let result = self.join(id, join).await;
        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_join(outcome, start.elapsed());
        result
    }

    async fn join(&mut self, id: &str, join: JoinParams) -> Result<(), SignalingError> {
        if self.joined.is_some() {
            return Err(SignalingError::AlreadyJoined);
        }

        // Role first: nothing is created for a request that cannot be granted
        if join.role.is_empty() {
            return Err(SignalingError::InvalidArgument("role is required".to_string()));
        }
        let grant = permissions_for_role(&join.role)?;

        if join.session_id.is_empty() {
            return Err(SignalingError::InvalidArgument(
                "session id is required".to_string(),
            ));
        }
        if join.user_id.is_empty() {
            return Err(SignalingError::InvalidArgument("user id is required".to_string()));
        }
        let offer = join
            .offer
            .ok_or_else(|| SignalingError::InvalidArgument("join requires an SDP offer".to_string()))?
            .parse()?;
        if offer.sdp_type != SdpType::Offer {
            return Err(SignalingError::InvalidArgument(
                "join description must be an offer".to_string(),
            ));
        }

        let peer = Peer::new(
            Uuid::new_v4().to_string(),
            join.session_id,
            join.user_id,
            join.role,
        );
        self.store.add_peer(&peer).await?;

        let (negotiation, answer, events) = match self.negotiate(&peer, grant, offer).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                if let Err(remove_err) = self.store.remove_peer(&peer.id).await {
                    warn!(
                        target: "sig.signaling.session",
                        peer_id = %peer.id,
                        error = %remove_err,
                        "Failed to remove peer after negotiation failure"
                    );
                }
                return Err(e);
            }
        };

        self.send(message::join_reply(id, answer, &peer.id)).await;

        // Started after the join reply so buffered candidates follow the answer
        let forwarder_token = self.cancel_token.child_token();
        let forwarder = spawn_event_forwarder(
            self.connection_id.clone(),
            events,
            self.outbound.clone(),
            forwarder_token.clone(),
        );

        info!(
            target: "sig.signaling.session",
            connection_id = %self.connection_id,
            session_id = %peer.session_id,
            peer_id = %peer.id,
            role = %peer.role,
            "Peer joined"
        );

        self.joined = Some(JoinedPeer {
            peer_id: peer.id,
            session_id: peer.session_id,
            grant,
            negotiation,
            forwarder,
            forwarder_token,
        });
        self.state.send_replace(ConnectionState::Joined);
        Ok(())
    }

    async fn negotiate(
        &self,
        peer: &Peer,
        grant: PermissionGrant,
        offer: SessionDescription,
    ) -> Result<
        (
            Box<dyn NegotiationPeer>,
            SessionDescription,
            mpsc::Receiver<NegotiatorEvent>,
        ),
        SignalingError,
    > {
        let (events_tx, events_rx) = mpsc::channel(NEGOTIATOR_EVENT_BUFFER);
        let negotiation = self.negotiators.create(events_tx).await?;

        let config = JoinConfig {
            no_publish: !grant.can_publish,
            no_subscribe: !grant.can_subscribe,
        };
        let answered = match negotiation
            .join(&peer.session_id, &peer.user_id, config)
            .await
        {
            Ok(()) => negotiation.answer(offer).await,
            Err(e) => Err(e),
        };

        match answered {
            Ok(answer) => Ok((negotiation, answer, events_rx)),
            Err(e) => {
                negotiation.close().await;
                Err(e.into())
            }
        }
    }

    async fn handle_trickle(&self, trickle: TrickleParams) {
        let Some(joined) = &self.joined else {
            debug!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                "Dropping trickle received before join"
            );
            metrics::record_message_error("trickle");
            return;
        };

        let Some(target) = trickle.target else {
            warn!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                "Dropping trickle with unknown target"
            );
            metrics::record_message_error("trickle");
            return;
        };

        if !joined.allows(target) {
            warn!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                peer_id = %joined.peer_id,
                leg = %target,
                "Dropping trickle for a leg the role does not permit"
            );
            metrics::record_message_error("trickle");
            return;
        }

        let candidate = match message::decode_candidate(&trickle.init) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    target: "sig.signaling.session",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Dropping trickle with malformed candidate"
                );
                metrics::record_message_error("trickle");
                return;
            }
        };

        if let Err(e) = joined.negotiation.trickle(candidate, target).await {
            warn!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                leg = %target,
                error = %e,
                "Failed to add remote ICE candidate"
            );
            metrics::record_message_error("trickle");
        }
    }

    async fn handle_description(
        &self,
        id: &str,
        raw: RawDescription,
    ) -> Result<(), SignalingError> {
        let Some(joined) = &self.joined else {
            debug!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                "Dropping description received before join"
            );
            metrics::record_message_error("description");
            return Ok(());
        };

        let description = raw.parse()?;
        match description.sdp_type {
            // Renegotiates the publisher leg set up at join, which every role has
            SdpType::Offer => {
                let answer = joined.negotiation.answer(description).await?;
                self.send(message::description_reply(id, answer)).await;
            }
            SdpType::Answer => {
                if !joined.allows(Target::Subscriber) {
                    return Err(SignalingError::InvalidArgument(
                        "role does not permit answering on the subscriber leg".to_string(),
                    ));
                }
                joined.negotiation.set_remote_description(description).await?;
            }
        }
        Ok(())
    }

    async fn send(&self, reply: SignalReply) {
        if self.outbound.send(Ok(reply)).await.is_err() {
            debug!(
                target: "sig.signaling.session",
                connection_id = %self.connection_id,
                "Client stream closed, reply dropped"
            );
        }
    }

    /// Close the negotiation peer and settle the store record.
    async fn release(&mut self, clean: bool) {
        if let Some(joined) = self.joined.take() {
            joined.forwarder_token.cancel();
            joined.negotiation.close().await;
            if let Err(e) = joined.forwarder.await {
                warn!(
                    target: "sig.signaling.session",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Event forwarder task failed"
                );
            }

            let result = if clean {
                self.store.remove_peer(&joined.peer_id).await
            } else {
                self.store
                    .update_peer_status(&joined.peer_id, PeerStatus::Disconnected)
                    .await
            };
            match result {
                Ok(()) | Err(StoreError::PeerNotFound) => debug!(
                    target: "sig.signaling.session",
                    connection_id = %self.connection_id,
                    session_id = %joined.session_id,
                    peer_id = %joined.peer_id,
                    left = clean,
                    "Released peer"
                ),
                Err(e) => warn!(
                    target: "sig.signaling.session",
                    connection_id = %self.connection_id,
                    peer_id = %joined.peer_id,
                    error = %e,
                    "Failed to update store for departing peer"
                ),
            }
        }

        self.state.send_replace(ConnectionState::Closed);
    }
}

/// Forward negotiator callbacks to the client until cancelled or either
/// channel closes.
fn spawn_event_forwarder(
    connection_id: String,
    mut events: mpsc::Receiver<NegotiatorEvent>,
    outbound: OutboundSender,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel_token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match message::event_reply(event) {
                Ok(reply) => {
                    if outbound.send(Ok(reply)).await.is_err() {
                        debug!(
                            target: "sig.signaling.session",
                            connection_id = %connection_id,
                            "Client stream closed, stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(e) => warn!(
                    target: "sig.signaling.session",
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to encode negotiator event"
                ),
            }
        }
    })
}

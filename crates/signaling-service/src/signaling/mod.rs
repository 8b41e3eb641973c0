//! Signaling relay protocol.
//!
//! - [`message`] - Decoding of inbound requests and encoding of replies
//! - [`session`] - `SignalingSession`, one per client stream

pub mod message;
pub mod session;

pub use message::SignalMessage;
pub use session::{ConnectionState, SignalingSession};

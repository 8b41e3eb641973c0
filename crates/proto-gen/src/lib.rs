//! Generated Protocol Buffer code for the Direct Link signaling relay.
//!
//! Holds the message types and the tonic client/server stubs for the
//! `directlink.signaling.SignalingService`.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting

// Re-export prost traits for convenience
pub use prost::Message;

// Generated protobuf modules
pub mod signaling {
    //! Client-relay signaling messages and session RPCs
    tonic::include_proto!("directlink.signaling");
}

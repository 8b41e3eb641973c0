//! Signaling Service Library
//!
//! Core of the Direct Link signaling relay:
//!
//! - Session and peer membership in Redis with TTL expiry
//! - Role-based publish/subscribe permissions (`camera`, `director`)
//! - A bidirectional gRPC stream per client that relays WebRTC offers,
//!   answers and ICE candidates to a negotiation peer
//! - Session administration RPCs and media server join tokens
//!
//! # Architecture
//!
//! ```text
//! grpc/signaling_service.rs -> signaling/session.rs -> store/*.rs
//!                                                   -> media/*.rs
//! ```
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with gRPC status mapping
//! - [`store`] - Membership store trait and Redis implementation
//! - [`signaling`] - Per-connection signaling session
//! - [`media`] - Negotiation peer seam and the WebRTC implementation
//! - [`server`] - Listener lifecycle and graceful shutdown

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod errors;
pub mod grpc;
pub mod media;
pub mod models;
pub mod observability;
pub mod permissions;
pub mod room_code;
pub mod server;
pub mod signaling;
pub mod store;
pub mod token;
pub mod webhook;

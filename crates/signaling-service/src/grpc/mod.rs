//! gRPC surface of the signaling relay.

pub mod signaling_service;

pub use signaling_service::SignalingGrpcService;

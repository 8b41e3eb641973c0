//! # Signaling Test Utilities
//!
//! Mocks and fixtures for testing the signaling service without Redis or a
//! media engine.
//!
//! ## Modules
//!
//! - `mock_store` - In-memory membership store with TTL expiry
//! - `mock_negotiator` - Recording negotiation peers
//! - `fixtures` - Session/peer builders, SDP and candidate samples, requests
//! - `store_contract` - Checks shared by every store implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = MockSessionStore::new()
//!         .with_session(TestSession::new("s1").with_max_peers(2).build());
//!     let negotiators = MockNegotiatorFactory::new();
//!
//!     // Drive a SignalingSession with join_request("1", "s1", "u1", "camera")...
//! }
//! ```

pub mod fixtures;
pub mod mock_negotiator;
pub mod mock_store;
pub mod store_contract;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_negotiator::*;
pub use mock_store::*;

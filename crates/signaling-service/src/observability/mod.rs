//! Observability for the signaling relay.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! SDP bodies, ICE candidates and credentials are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signaling_connections_active` | Gauge | none | Open signaling streams |
//! | `signaling_messages_total` | Counter | `kind` | Inbound messages |
//! | `signaling_message_errors_total` | Counter | `kind` | Dropped or failed messages |
//! | `signaling_joins_total` | Counter | `outcome` | Join attempts |
//! | `signaling_join_duration_seconds` | Histogram | none | Join latency incl. negotiation |
//! | `signaling_store_latency_seconds` | Histogram | `operation`, `status` | Redis round trips |
//! | `signaling_webhook_events_total` | Counter | `event`, `duplicate` | Media server webhooks |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};

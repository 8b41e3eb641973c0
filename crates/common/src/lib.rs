//! Common utilities shared across Direct Link components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the Redis connection string and
//! the media server API secret. `SecretString` implements `Debug` with
//! redaction, so structs that derive `Debug` stay safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct MediaCredentials {
//!     api_key: String,
//!     api_secret: SecretString,
//! }
//!
//! let creds = MediaCredentials {
//!     api_key: "APIkey".to_string(),
//!     api_secret: SecretString::from("shh"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("shh"));
//! assert_eq!(creds.api_secret.expose_secret(), "shh");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Replace the userinfo part of a connection URL with `***`.
///
/// `redis://:hunter2@cache:6379/0` becomes `redis://***@cache:6379/0`.
/// URLs without credentials are returned unchanged.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let (scheme, rest) = url.split_at(scheme_end + 3);
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    match authority.rfind('@') {
        Some(at) => {
            let host = authority.get(at + 1..).unwrap_or_default();
            format!("{scheme}***@{host}{path}")
        }
        None => url.to_string(),
    }
}

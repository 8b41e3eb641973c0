//! Media server access tokens.
//!
//! Tokens are HS256 JWTs signed with the media server API secret. The
//! claims carry a video grant naming the room and the publish/subscribe
//! rights resolved from the participant's role.

use crate::errors::SignalingError;
use crate::permissions::PermissionGrant;
use chrono::Utc;
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

/// Default token lifetime.
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(60 * 60);

/// Room permissions embedded in an access token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_join: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_subscribe: Option<bool>,
}

impl VideoGrant {
    /// Grant to join `room` with the given rights.
    pub fn join_room(room: impl Into<String>, grant: PermissionGrant) -> Self {
        Self {
            room_join: true,
            room: room.into(),
            can_publish: Some(grant.can_publish),
            can_subscribe: Some(grant.can_subscribe),
        }
    }
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// API key
    pub iss: String,
    /// Participant identity
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoGrant>,
}

/// Builder for a signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    api_key: String,
    api_secret: SecretString,
    identity: Option<String>,
    grant: Option<VideoGrant>,
    valid_for: Duration,
}

impl AccessToken {
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            identity: None,
            grant: None,
            valid_for: DEFAULT_TOKEN_VALIDITY,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn with_grant(mut self, grant: VideoGrant) -> Self {
        self.grant = Some(grant);
        self
    }

    #[must_use]
    pub fn with_valid_for(mut self, valid_for: Duration) -> Self {
        self.valid_for = valid_for;
        self
    }

    /// Sign the token.
    ///
    /// # Errors
    ///
    /// `TokenSigning` if a room-join grant has no identity, the key or
    /// secret is empty, or signing fails.
    pub fn to_jwt(&self) -> Result<String, SignalingError> {
        if self.api_key.is_empty() || self.api_secret.expose_secret().is_empty() {
            return Err(SignalingError::TokenSigning(
                "API key and secret are required".to_string(),
            ));
        }
        let identity = self.identity.clone().unwrap_or_default();
        if identity.is_empty() && self.grant.as_ref().is_some_and(|g| g.room_join) {
            return Err(SignalingError::TokenSigning(
                "identity is required to join a room".to_string(),
            ));
        }

        let now = Utc::now().timestamp();
        let valid_for = i64::try_from(self.valid_for.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessClaims {
            iss: self.api_key.clone(),
            sub: identity,
            nbf: now,
            exp: now.saturating_add(valid_for),
            video: self.grant.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            error!(target: "sig.token", error = %e, "Failed to sign access token");
            SignalingError::TokenSigning(e.to_string())
        })
    }
}

/// Signed token plus where to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinToken {
    pub token: String,
    pub url: String,
}

/// Issues join tokens for one media server deployment.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    url: String,
    api_key: String,
    api_secret: SecretString,
    valid_for: Duration,
}

impl TokenIssuer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: SecretString,
        valid_for: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret,
            valid_for,
        }
    }

    /// Token letting `user_id` join room `session_id` with `grant`.
    pub fn issue(
        &self,
        session_id: &str,
        user_id: &str,
        grant: PermissionGrant,
    ) -> Result<JoinToken, SignalingError> {
        let token = AccessToken::new(self.api_key.clone(), self.api_secret.clone())
            .with_identity(user_id)
            .with_grant(VideoGrant::join_room(session_id, grant))
            .with_valid_for(self.valid_for)
            .to_jwt()?;

        Ok(JoinToken {
            token,
            url: self.url.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::permissions::permissions_for_role;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn decode_claims(token: &str, secret: &str) -> AccessClaims {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .unwrap()
        .claims
    }

    #[test]
    fn test_token_carries_identity_and_grant() {
        let grant = permissions_for_role("camera").unwrap();
        let token = AccessToken::new("APIkey", SecretString::from("secret"))
            .with_identity("u1")
            .with_grant(VideoGrant::join_room("s1", grant))
            .to_jwt()
            .unwrap();

        let claims = decode_claims(&token, "secret");
        assert_eq!(claims.iss, "APIkey");
        assert_eq!(claims.sub, "u1");
        let video = claims.video.unwrap();
        assert!(video.room_join);
        assert_eq!(video.room, "s1");
        assert_eq!(video.can_publish, Some(true));
        assert_eq!(video.can_subscribe, Some(false));
    }

    #[test]
    fn test_validity_window() {
        let token = AccessToken::new("k", SecretString::from("s"))
            .with_identity("u1")
            .with_valid_for(Duration::from_secs(120))
            .to_jwt()
            .unwrap();

        let claims = decode_claims(&token, "s");
        assert_eq!(claims.exp - claims.nbf, 120);
    }

    #[test]
    fn test_grant_json_uses_camel_case() {
        let grant = VideoGrant::join_room("s1", permissions_for_role("director").unwrap());
        let json = serde_json::to_value(&grant).unwrap();

        assert_eq!(json["roomJoin"], true);
        assert_eq!(json["canSubscribe"], true);
        assert_eq!(json["canPublish"], false);
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let token = AccessToken::new("k", SecretString::from("right"))
            .with_identity("u1")
            .to_jwt()
            .unwrap();

        let result = decode::<AccessClaims>(
            &token,
            &DecodingKey::from_secret(b"wrong"),
            &Validation::new(Algorithm::HS256),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_room_join_without_identity_is_rejected() {
        let grant = permissions_for_role("camera").unwrap();
        let result = AccessToken::new("k", SecretString::from("s"))
            .with_grant(VideoGrant::join_room("s1", grant))
            .to_jwt();
        assert!(matches!(result, Err(SignalingError::TokenSigning(_))));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let result = AccessToken::new("k", SecretString::from(""))
            .with_identity("u1")
            .to_jwt();
        assert!(matches!(result, Err(SignalingError::TokenSigning(_))));
    }

    #[test]
    fn test_issuer_returns_url() {
        let issuer = TokenIssuer::new(
            "wss://media.example.com",
            "k",
            SecretString::from("s"),
            DEFAULT_TOKEN_VALIDITY,
        );
        let join = issuer
            .issue("s1", "u1", permissions_for_role("director").unwrap())
            .unwrap();

        assert_eq!(join.url, "wss://media.example.com");
        let claims = decode_claims(&join.token, "s");
        assert_eq!(claims.video.unwrap().room, "s1");
    }
}

//! Session and peer records owned by the membership store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "closed" => Ok(SessionStatus::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

impl PeerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerStatus::Connected => "connected",
            PeerStatus::Disconnected => "disconnected",
        }
    }
}

impl FromStr for PeerStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(PeerStatus::Connected),
            "disconnected" => Ok(PeerStatus::Disconnected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored status string that is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status {0:?}")]
pub struct UnknownStatus(pub String);

/// A video-call room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub room_code: String,
    pub created_at: DateTime<Utc>,
    pub max_peers: u32,
    pub status: SessionStatus,
}

impl Session {
    /// New active session created now.
    pub fn new(id: impl Into<String>, room_code: impl Into<String>, max_peers: u32) -> Self {
        Self {
            id: id.into(),
            room_code: room_code.into(),
            created_at: Utc::now(),
            max_peers,
            status: SessionStatus::Active,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }
}

/// A participant in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    /// Kept as a string so new roles need no schema change.
    pub role: String,
    pub joined_at: DateTime<Utc>,
    pub status: PeerStatus,
}

impl Peer {
    /// New connected peer joining now.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role: role.into(),
            joined_at: Utc::now(),
            status: PeerStatus::Connected,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [SessionStatus::Active, SessionStatus::Closed] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        for status in [PeerStatus::Connected, PeerStatus::Disconnected] {
            assert_eq!(status.as_str().parse::<PeerStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "paused".parse::<SessionStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("paused".to_string()));
    }

    #[test]
    fn test_serde_uses_snake_case_fields() {
        let peer = Peer::new("p1", "s1", "u1", "camera");
        let json = serde_json::to_value(&peer).unwrap();

        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["status"], "connected");
    }

    #[test]
    fn test_new_session_is_active() {
        let session = Session::new("s1", "ABC123", 2);
        assert!(!session.is_closed());
        assert_eq!(session.max_peers, 2);
    }
}

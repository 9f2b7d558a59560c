//! Time-ordered identifiers.
//!
//! Session ids, utterance ids, and event ids all share one representation:
//! a UUIDv7. Unlike the v4 ids used for request correlation elsewhere, v7
//! embeds a millisecond timestamp in its high bits, so both lexicographic
//! and numeric ordering of the id match creation order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A time-ordered unique identifier (session id, utterance id, event id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(Uuid);

impl GatewayId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for GatewayId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GatewayId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifies a client connection's Session (root aggregate).
pub type SessionId = GatewayId;
/// Identifies a single TTS generation cycle.
pub type UtteranceId = GatewayId;
/// Identifies a single wire frame / correlated response group.
pub type EventId = GatewayId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_lexicographically_ordered_by_creation_time() {
        let a = GatewayId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = GatewayId::new();
        assert!(a.to_string() < b.to_string());
        assert!(a < b);
    }

    #[test]
    fn round_trips_through_string() {
        let id = GatewayId::new();
        let parsed: GatewayId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = GatewayId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}

//! The wire-frame envelope shared by every event crossing the gateway.
//!
//! Concrete per-event payload shapes (the event catalogue) live in
//! `gateway-server::protocol`; this module only fixes the envelope every
//! frame is wrapped in, so crates that need to *construct* a frame (the LLM
//! and pipeline engines, when they raise an error that must reach the
//! client) don't need to depend on the server crate.

use crate::ids::{EventId, SessionId};
use serde::{Deserialize, Serialize};

/// Priority class used for shedding frames under pressure (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

/// A self-describing frame: hierarchical dotted event type, a time-ordered
/// event id, the owning session, and a typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<P> {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "eventId")]
    pub event_id: EventId,
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    pub payload: P,
}

impl<P> Frame<P> {
    pub fn new(event_type: impl Into<String>, session_id: SessionId, payload: P) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: EventId::new(),
            session_id,
            payload,
        }
    }

    /// Build a frame that shares an existing event id — used when several
    /// frames (e.g. all audio chunks of one TTS response) must correlate
    /// under a single outer event id.
    pub fn with_event_id(
        event_type: impl Into<String>,
        event_id: EventId,
        session_id: SessionId,
        payload: P,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id,
            session_id,
            payload,
        }
    }
}

/// Payload of a derived error frame (§4.1, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// The original `eventType` that triggered this error, echoed back.
    #[serde(rename = "requestType")]
    pub request_type: String,
    /// A user-safe message — never a stack trace or upstream provider name.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_event_id_frames_correlate() {
        let session = SessionId::new();
        let event_id = EventId::new();
        let start = Frame::with_event_id("audio.output.start", event_id, session, ());
        let complete = Frame::with_event_id("audio.output.complete", event_id, session, ());
        assert_eq!(start.event_id, complete.event_id);
    }

    #[test]
    fn fresh_frames_get_distinct_event_ids() {
        let session = SessionId::new();
        let a = Frame::new("transcript.interim.result", session, ());
        let b = Frame::new("transcript.interim.result", session, ());
        assert_ne!(a.event_id, b.event_id);
    }
}

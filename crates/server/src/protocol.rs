//! The event catalogue: concrete per-event payload shapes carried inside
//! `gateway_core::Frame`, plus the event-type constants and direction/
//! priority tables the gateway dispatches on (§4.1).
//!
//! Inbound frames are decoded in two passes: first into `InboundEnvelope`
//! (event type known, payload still raw JSON), then the payload is
//! deserialized into the concrete struct for that event type. This mirrors
//! the `#[serde(tag = "eventType")]`-style dispatch described for the wire
//! format without tying the envelope's Rust type to one fixed payload enum.

use serde::{Deserialize, Serialize};

use gateway_core::{EventId, Frame, Priority, SessionId, UtteranceId};

pub mod event_type {
    pub const CONNECTION_LIFECYCLE_ACK: &str = "connection.lifecycle.ack";
    pub const AUDIO_INPUT_START: &str = "audio.input.start";
    pub const AUDIO_INPUT_CHUNK: &str = "audio.input.chunk";
    pub const AUDIO_INPUT_STOP: &str = "audio.input.stop";
    pub const TRANSCRIPT_INTERIM_RESULT: &str = "transcript.interim.result";
    pub const TRANSCRIPT_FINAL_RESULT: &str = "transcript.final.result";
    pub const AUDIO_OUTPUT_START: &str = "audio.output.start";
    pub const AUDIO_OUTPUT_CHUNK: &str = "audio.output.chunk";
    pub const AUDIO_OUTPUT_COMPLETE: &str = "audio.output.complete";
    pub const USER_ACTION_INTERRUPT: &str = "user.action.interrupt";
}

/// Which side is allowed to originate an event of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    Bidirectional,
}

/// Declared direction and priority for every cataloged event type, used by
/// the gateway to reject misdirected frames and to decide what to shed
/// under backpressure. Unrecognized event types are not in this table;
/// callers fall back to `GatewayError::UnknownEventType`.
pub fn classify(event_type: &str) -> Option<(Direction, Priority)> {
    use event_type::*;
    Some(match event_type {
        CONNECTION_LIFECYCLE_ACK => (Direction::ServerToClient, Priority::Critical),
        AUDIO_INPUT_START => (Direction::ClientToServer, Priority::Critical),
        AUDIO_INPUT_CHUNK => (Direction::ClientToServer, Priority::High),
        AUDIO_INPUT_STOP => (Direction::ClientToServer, Priority::Critical),
        TRANSCRIPT_INTERIM_RESULT => (Direction::ServerToClient, Priority::Low),
        TRANSCRIPT_FINAL_RESULT => (Direction::ServerToClient, Priority::High),
        AUDIO_OUTPUT_START => (Direction::ServerToClient, Priority::Critical),
        AUDIO_OUTPUT_CHUNK => (Direction::ServerToClient, Priority::High),
        AUDIO_OUTPUT_COMPLETE => (Direction::ServerToClient, Priority::Critical),
        USER_ACTION_INTERRUPT => (Direction::ClientToServer, Priority::Critical),
        _ => return None,
    })
}

/// A decoded client frame before its payload is typed: the event type
/// drives which concrete payload struct `serde_json::from_value` produces
/// next. `event_id`/`session_id` are optional since the very first frame on
/// a connection (`audio.input.start`) precedes the server's ack.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "eventId")]
    pub event_id: Option<EventId>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioInputStartPayload {
    #[serde(rename = "sampleRateHz")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en-US".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAckPayload {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptPayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioOutputStartPayload {
    #[serde(rename = "utteranceId")]
    pub utterance_id: UtteranceId,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioOutputCompletePayload {
    #[serde(rename = "utteranceId")]
    pub utterance_id: UtteranceId,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

pub fn connection_ack(session_id: SessionId) -> Frame<ConnectionAckPayload> {
    Frame::new(
        event_type::CONNECTION_LIFECYCLE_ACK,
        session_id,
        ConnectionAckPayload { session_id },
    )
}

pub fn transcript_interim(session_id: SessionId, text: String) -> Frame<TranscriptPayload> {
    Frame::new(
        event_type::TRANSCRIPT_INTERIM_RESULT,
        session_id,
        TranscriptPayload { text },
    )
}

pub fn transcript_final(session_id: SessionId, text: String) -> Frame<TranscriptPayload> {
    Frame::new(
        event_type::TRANSCRIPT_FINAL_RESULT,
        session_id,
        TranscriptPayload { text },
    )
}

pub fn audio_output_start(
    session_id: SessionId,
    event_id: EventId,
    utterance_id: UtteranceId,
) -> Frame<AudioOutputStartPayload> {
    Frame::with_event_id(
        event_type::AUDIO_OUTPUT_START,
        event_id,
        session_id,
        AudioOutputStartPayload { utterance_id },
    )
}

pub fn audio_output_complete(
    session_id: SessionId,
    event_id: EventId,
    utterance_id: UtteranceId,
    duration_ms: u64,
) -> Frame<AudioOutputCompletePayload> {
    Frame::with_event_id(
        event_type::AUDIO_OUTPUT_COMPLETE,
        event_id,
        session_id,
        AudioOutputCompletePayload {
            utterance_id,
            duration_ms,
        },
    )
}

/// Derived error frame: echoes the request type and the originating event id
/// that triggered it (§4.1, §7).
pub fn error_frame(
    session_id: SessionId,
    event_id: EventId,
    request_type: &str,
    message: String,
) -> Frame<gateway_core::ErrorPayload> {
    Frame::with_event_id(
        format!("{request_type}.error"),
        event_id,
        session_id,
        gateway_core::ErrorPayload {
            request_type: request_type.to_string(),
            message,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_input_start_is_client_originated_and_critical() {
        let (direction, priority) = classify(event_type::AUDIO_INPUT_START).unwrap();
        assert_eq!(direction, Direction::ClientToServer);
        assert_eq!(priority, Priority::Critical);
    }

    #[test]
    fn unrecognized_event_type_has_no_classification() {
        assert!(classify("nonsense.event").is_none());
    }

    #[test]
    fn envelope_decodes_with_optional_ids_absent() {
        let json = r#"{"eventType":"audio.input.start","payload":{"sampleRateHz":48000}}"#;
        let envelope: InboundEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.event_type, "audio.input.start");
        assert!(envelope.session_id.is_none());
        let payload: AudioInputStartPayload = serde_json::from_value(envelope.payload).unwrap();
        assert_eq!(payload.sample_rate_hz, 48000);
        assert_eq!(payload.language, "en-US");
    }

    #[test]
    fn error_frame_echoes_request_type_and_event_id() {
        let event_id = EventId::new();
        let frame = error_frame(SessionId::new(), event_id, "audio.input.chunk", "bad sample rate".into());
        assert_eq!(frame.event_type, "audio.input.chunk.error");
        assert_eq!(frame.payload.request_type, "audio.input.chunk");
        assert_eq!(frame.event_id, event_id);
    }
}

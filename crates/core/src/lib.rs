//! Shared types for the voice-conversation gateway.
//!
//! This crate provides foundational types used across the other crates:
//! sample rates and the PCM resampler, time-ordered ids, the wire-frame
//! envelope, conversation-history turns, and the shared error taxonomy.

pub mod audio;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod ids;

pub use audio::{resample_pcm16, SampleRate};
pub use conversation::{Turn, TurnRole};
pub use error::{Classified, CoreError, ErrorKind};
pub use frame::{ErrorPayload, Frame, Priority};
pub use ids::{EventId, GatewayId, SessionId, UtteranceId};

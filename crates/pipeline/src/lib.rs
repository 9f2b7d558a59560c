//! Persistent-upstream STT and TTS engines.
//!
//! Both engines share one shape: dial once, hold the connection for the
//! life of the session, reconnect with backoff on unexpected close, and
//! buffer outbound data while the connection is down. `connection` holds
//! that shared skeleton; `stt` and `tts` build the per-engine state machine
//! and event catalogue on top of it.

pub mod connection;
pub mod error;
pub mod stt;
pub mod tts;

pub use connection::ConnectionState;
pub use error::PipelineError;
pub use stt::{SttEvent, SttSession};
pub use tts::{SynthesisState, TtsEvent, TtsSession};

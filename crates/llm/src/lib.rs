//! Upstream LLM integration: a vendor-agnostic backend trait, per-session
//! conversation history with a bounded request queue, tiered fallback on
//! upstream failure, and the semantic streamer that turns a completed
//! response into ordered TTS chunks (§4.5, §4.6).

pub mod backend;
pub mod error;
pub mod history;
pub mod streamer;

pub use backend::{HttpLlmBackend, LlmBackend, StreamEvent};
pub use error::{LlmError, Result};
pub use history::{LlmEngine, LlmTurn};
pub use streamer::{Chunk, SemanticStreamer};

//! Shared error taxonomy.
//!
//! Every crate-local error enum (`SttError`, `LlmError`, `TtsError`, ...)
//! tags each variant with one of these kinds via `ErrorKind` and implements
//! `Classified`, so upstream failure handling dispatches on the tag rather
//! than matching error text.

use serde::{Deserialize, Serialize};

/// Taxonomy of error kinds, not type names (see error handling design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Empty/malformed frame, invalid sample rate, missing session, unknown event type.
    Input,
    /// Network, timeout, rate limit — retryable with back-off.
    TransientUpstream,
    /// Authentication, invalid request, quota exceeded — not retryable.
    FatalUpstream,
    /// Illegal state transition attempted.
    Protocol,
    /// Queue overflow, buffer overflow, session cap, shutdown in progress.
    Resource,
    /// TTS failed mid-response, transcript empty on finalization, etc.
    PartialDelivery,
}

/// Implemented by every crate-local error enum so handlers can dispatch on
/// kind rather than on the concrete error type or its message text.
pub trait Classified {
    fn kind(&self) -> ErrorKind;

    /// Whether a caller should retry the operation that produced this error.
    fn retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientUpstream)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
}

impl Classified for CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidSampleRate(_) => ErrorKind::Input,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_fatal_is_not() {
        assert!(ErrorKind::TransientUpstream == ErrorKind::TransientUpstream);
        struct Fake(ErrorKind);
        impl Classified for Fake {
            fn kind(&self) -> ErrorKind {
                self.0
            }
        }
        assert!(Fake(ErrorKind::TransientUpstream).retryable());
        assert!(!Fake(ErrorKind::FatalUpstream).retryable());
    }
}

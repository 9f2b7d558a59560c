//! The gateway's top-level error type: aggregates every crate-local error
//! behind `#[from]` plus the handful of failure modes that only make sense
//! at the gateway layer itself (bad frames, unknown routes, capacity).

use gateway_core::{Classified, CoreError, ErrorKind};
use gateway_llm::LlmError;
use gateway_pipeline::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed client frame: {0}")]
    InvalidFrame(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("no session registered for this connection")]
    MissingSession,

    #[error("audio.input.start required before audio can be forwarded")]
    SessionNotStarted,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("concurrent session limit reached")]
    SessionCapExceeded,

    #[error("server is shutting down")]
    ShuttingDown,
}

impl Classified for GatewayError {
    fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidFrame(_)
            | GatewayError::UnknownEventType(_)
            | GatewayError::MissingSession
            | GatewayError::SessionNotStarted => ErrorKind::Input,
            GatewayError::Core(err) => err.kind(),
            GatewayError::Pipeline(err) => err.kind(),
            GatewayError::Llm(err) => err.kind(),
            GatewayError::RateLimited(_)
            | GatewayError::SessionCapExceeded
            | GatewayError::ShuttingDown => ErrorKind::Resource,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_errors_are_not_retryable() {
        assert!(!GatewayError::SessionCapExceeded.retryable());
        assert!(!GatewayError::ShuttingDown.retryable());
    }

    #[test]
    fn wrapped_pipeline_error_keeps_its_kind() {
        let err: GatewayError = PipelineError::ConnectTimeout.into();
        assert_eq!(err.kind(), ErrorKind::TransientUpstream);
        assert!(err.retryable());
    }

    #[test]
    fn unknown_event_type_is_input() {
        assert_eq!(
            GatewayError::UnknownEventType("bogus".into()).kind(),
            ErrorKind::Input
        );
    }
}

use gateway_core::{Classified, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("upstream websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("upstream url invalid: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("upstream rejected the request: {0}")]
    FatalUpstream(String),

    #[error("upstream connection timed out")]
    ConnectTimeout,

    #[error("finalization handshake timed out")]
    FinalizationTimeout,

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("reconnection buffer exhausted, {dropped} bytes discarded")]
    BufferOverflow { dropped: usize },

    #[error("synthesis failed after {chunks_sent} chunk(s) were already delivered")]
    PartialDelivery { chunks_sent: usize },

    #[error("failed to decode upstream frame: {0}")]
    Protocol(String),
}

impl Classified for PipelineError {
    fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::WebSocket(_) | PipelineError::ConnectTimeout => {
                ErrorKind::TransientUpstream
            }
            PipelineError::UrlParse(_) | PipelineError::FatalUpstream(_) => ErrorKind::FatalUpstream,
            PipelineError::FinalizationTimeout => ErrorKind::PartialDelivery,
            PipelineError::IllegalTransition { .. } => ErrorKind::Protocol,
            PipelineError::BufferOverflow { .. } => ErrorKind::Resource,
            PipelineError::PartialDelivery { .. } => ErrorKind::PartialDelivery,
            PipelineError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_timeout_is_retryable() {
        assert!(PipelineError::ConnectTimeout.retryable());
    }

    #[test]
    fn fatal_upstream_is_not_retryable() {
        assert!(!PipelineError::FatalUpstream("bad request".into()).retryable());
    }
}

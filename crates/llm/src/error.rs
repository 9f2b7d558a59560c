use gateway_core::{Classified, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned an error: {0}")]
    Api(String),

    #[error("malformed upstream response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("queue is full, request dropped")]
    QueueFull,

    #[error("all configured tiers failed")]
    AllTiersFailed,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl Classified for LlmError {
    fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Network(_) | LlmError::Timeout => ErrorKind::TransientUpstream,
            LlmError::Api(_) | LlmError::Configuration(_) => ErrorKind::FatalUpstream,
            LlmError::InvalidResponse(_) => ErrorKind::Protocol,
            LlmError::QueueFull => ErrorKind::Resource,
            LlmError::AllTiersFailed => ErrorKind::FatalUpstream,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

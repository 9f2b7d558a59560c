//! Layered configuration for the voice-conversation gateway.
//!
//! Loads from compiled-in defaults, an optional `config/default.toml`, an
//! optional environment-specific file, and `GATEWAY_`-prefixed environment
//! variables, in increasing priority. `Settings::validate()` runs once at
//! startup and rejects the process before it binds a port.

pub mod settings;

pub use settings::{
    load_settings, ChunkingConfig, LlmConfig, ObservabilityConfig, RateLimitConfig,
    RuntimeEnvironment, ServerConfig, SessionLimits, Settings, SttConfig, TtsConfig,
    DEFAULT_BREAK_MARKER,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

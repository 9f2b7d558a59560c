//! The `Settings` aggregate: one nested struct per component, loaded in
//! layers (defaults -> file -> environment) and validated once at startup.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Literal inserted by the LLM between natural speech pauses so the
/// semantic streamer can split a response into ordered TTS chunks.
pub const DEFAULT_BREAK_MARKER: &str = "||BREAK||";

/// Controls log format and how strict validation is (production refuses
/// more than development does).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }

    /// Production and staging emit JSON logs; development emits pretty output.
    pub fn wants_json_logs(&self) -> bool {
        self.is_strict()
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionLimits,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_session()?;
        self.validate_stt()?;
        self.validate_llm()?;
        self.validate_tts()?;
        self.validate_chunking()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.server.max_concurrent_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_concurrent_sessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let rate_limit = &self.server.rate_limit;
        if rate_limit.enabled {
            if rate_limit.messages_per_second == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.messages_per_second".to_string(),
                    message: "must be at least 1 when rate limiting is enabled".to_string(),
                });
            }
            if rate_limit.burst_multiplier < 1.0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.burst_multiplier".to_string(),
                    message: format!("must be at least 1.0, got {}", rate_limit.burst_multiplier),
                });
            }
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        if self.session.idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.idle_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.session.max_duration_ms < self.session.idle_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "session.max_duration_ms".to_string(),
                message: "must be at least session.idle_timeout_ms".to_string(),
            });
        }
        Ok(())
    }

    fn validate_stt(&self) -> Result<(), ConfigError> {
        if self.stt.finalization_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stt.finalization_timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.stt.reconnect_buffer_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stt.reconnect_buffer_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".to_string(),
                message: format!("must be within 0.0..=2.0, got {}", self.llm.temperature),
            });
        }
        if !(0.0..=1.0).contains(&self.llm.top_p) {
            return Err(ConfigError::InvalidValue {
                field: "llm.top_p".to_string(),
                message: format!("must be within 0.0..=1.0, got {}", self.llm.top_p),
            });
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.max_tokens".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.llm.queue_bound == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.queue_bound".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn validate_tts(&self) -> Result<(), ConfigError> {
        if self.tts.max_text_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.max_text_length".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.tts.sample_rate_hz == 0 || self.tts.client_sample_rate_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.sample_rate_hz".to_string(),
                message: "sample rates must be nonzero".to_string(),
            });
        }
        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        if self.chunking.break_marker.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "chunking.break_marker".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.chunking.min_words_per_chunk > self.chunking.max_words_per_chunk {
            return Err(ConfigError::InvalidValue {
                field: "chunking.min_words_per_chunk".to_string(),
                message: "must not exceed chunking.max_words_per_chunk".to_string(),
            });
        }
        if self.chunking.safety_byte_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunking.safety_byte_cap".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Process-level server configuration: bind address, session cap, rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_per_session_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws/conversation".to_string()
}
fn default_max_concurrent_sessions() -> usize {
    500
}
fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            rate_limit: RateLimitConfig::default(),
            shutdown_per_session_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Per-connection inbound rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,
    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u32,
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

fn default_true() -> bool {
    true
}
fn default_messages_per_second() -> u32 {
    100
}
fn default_audio_bytes_per_second() -> u32 {
    // 48kHz * 2 bytes/sample, with headroom
    192_000
}
fn default_burst_multiplier() -> f32 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: default_messages_per_second(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

/// Idle-sweep and max-duration bounds enforced by the resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLimits {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_idle_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn default_max_duration_ms() -> u64 {
    2 * 60 * 60 * 1000
}
fn default_sweep_interval_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            max_duration_ms: default_max_duration_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// STT upstream connection and buffering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_stt_url")]
    pub upstream_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_finalization_timeout_ms")]
    pub finalization_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_reconnect_buffer_bytes")]
    pub reconnect_buffer_bytes: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_stt_model() -> String {
    "default".to_string()
}
fn default_language() -> String {
    "en-US".to_string()
}
fn default_stt_url() -> String {
    "wss://stt.upstream.example/v1/stream".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_finalization_timeout_ms() -> u64 {
    3_000
}
fn default_keep_alive_interval_ms() -> u64 {
    8_000
}
fn default_reconnect_buffer_bytes() -> usize {
    // ~2s of 16kHz mono 16-bit PCM
    64_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_stt_model(),
            language: default_language(),
            upstream_url: default_stt_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            finalization_timeout_ms: default_finalization_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            reconnect_buffer_bytes: default_reconnect_buffer_bytes(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// LLM generation parameters and fallback/queue behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_url")]
    pub upstream_url: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_llm_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}
fn default_llm_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}
fn default_system_prompt() -> String {
    format!(
        "You are a helpful voice assistant. Keep responses concise and \
         conversational. Insert the literal marker {} between natural \
         speech pauses so your response can be split into chunks for \
         text-to-speech.",
        DEFAULT_BREAK_MARKER
    )
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    512
}
fn default_top_p() -> f32 {
    0.9
}
fn default_request_timeout_ms() -> u64 {
    20_000
}
fn default_queue_bound() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_llm_model(),
            upstream_url: default_llm_url(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            request_timeout_ms: default_request_timeout_ms(),
            queue_bound: default_queue_bound(),
            max_retries: default_max_retries(),
        }
    }
}

/// TTS upstream connection, audio format, and buffering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model_id")]
    pub model_id: String,
    #[serde(default = "default_tts_url")]
    pub upstream_url: String,
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default = "default_client_sample_rate")]
    pub client_sample_rate_hz: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_reconnect_buffer_chars")]
    pub reconnect_buffer_chars: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

fn default_voice_id() -> String {
    "default".to_string()
}
fn default_tts_model_id() -> String {
    "default".to_string()
}
fn default_tts_url() -> String {
    "wss://tts.upstream.example/v1/stream".to_string()
}
fn default_tts_sample_rate() -> u32 {
    16_000
}
fn default_client_sample_rate() -> u32 {
    48_000
}
fn default_reconnect_buffer_chars() -> usize {
    2_000
}
fn default_max_text_length() -> usize {
    2_000
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_tts_model_id(),
            upstream_url: default_tts_url(),
            sample_rate_hz: default_tts_sample_rate(),
            client_sample_rate_hz: default_client_sample_rate(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            reconnect_buffer_chars: default_reconnect_buffer_chars(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_text_length: default_max_text_length(),
        }
    }
}

/// Semantic-streamer chunking thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_break_marker")]
    pub break_marker: String,
    #[serde(default = "default_safety_byte_cap")]
    pub safety_byte_cap: usize,
    #[serde(default = "default_min_words_per_chunk")]
    pub min_words_per_chunk: usize,
    #[serde(default = "default_max_words_per_chunk")]
    pub max_words_per_chunk: usize,
    #[serde(default = "default_max_chars_per_chunk")]
    pub max_chars_per_chunk: usize,
}

fn default_break_marker() -> String {
    DEFAULT_BREAK_MARKER.to_string()
}
fn default_safety_byte_cap() -> usize {
    400
}
fn default_min_words_per_chunk() -> usize {
    5
}
fn default_max_words_per_chunk() -> usize {
    50
}
fn default_max_chars_per_chunk() -> usize {
    300
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            break_marker: default_break_marker(),
            safety_byte_cap: default_safety_byte_cap(),
            min_words_per_chunk: default_min_words_per_chunk(),
            max_words_per_chunk: default_max_words_per_chunk(),
            max_chars_per_chunk: default_max_chars_per_chunk(),
        }
    }
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Load layered configuration: compiled-in defaults, an optional
/// `config/default.toml`, an optional `config/{env}.toml` selected by the
/// caller, then `GATEWAY_`-prefixed environment variables (`__` nesting).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("GATEWAY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut settings = Settings::default();
        settings.llm.temperature = 3.0;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "llm.temperature"));
    }

    #[test]
    fn zero_queue_bound_is_rejected() {
        let mut settings = Settings::default();
        settings.llm.queue_bound = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn min_words_exceeding_max_is_rejected() {
        let mut settings = Settings::default();
        settings.chunking.min_words_per_chunk = 100;
        settings.chunking.max_words_per_chunk = 10;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_break_marker_is_rejected() {
        let mut settings = Settings::default();
        settings.chunking.break_marker = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn max_duration_shorter_than_idle_timeout_is_rejected() {
        let mut settings = Settings::default();
        settings.session.max_duration_ms = 10;
        settings.session.idle_timeout_ms = 1000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn production_wants_json_logs_development_does_not() {
        assert!(!RuntimeEnvironment::Development.wants_json_logs());
        assert!(RuntimeEnvironment::Production.wants_json_logs());
    }
}

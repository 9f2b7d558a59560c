//! Per-connection inbound rate limiting (§6 configuration: `RateLimitConfig`).
//!
//! Two independent token buckets per session — one for message count, one
//! for audio bytes — refilled continuously and capped at
//! `rate * burst_multiplier`. This guards the gateway itself against a
//! misbehaving or malicious client flooding frames faster than the STT/TTS
//! sub-sessions can drain them; it is unrelated to the upstream providers'
//! own rate limits, which surface as `ErrorKind::TransientUpstream`.

use std::time::Instant;

use gateway_config::RateLimitConfig;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("message rate exceeded")]
    Messages,
    #[error("audio byte rate exceeded")]
    AudioBytes,
}

struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_per_sec: f64, burst_multiplier: f64) -> Self {
        let capacity = rate_per_sec * burst_multiplier.max(1.0);
        Self {
            capacity,
            refill_per_sec: rate_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, cost: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// One session's rate limiter. `None` buckets mean rate limiting is disabled
/// for that dimension (or globally, via `RateLimitConfig::enabled`).
pub struct RateLimiter {
    messages: Option<Mutex<Bucket>>,
    audio_bytes: Option<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self {
                messages: None,
                audio_bytes: None,
            };
        }
        Self {
            messages: Some(Mutex::new(Bucket::new(
                config.messages_per_second as f64,
                config.burst_multiplier as f64,
            ))),
            audio_bytes: Some(Mutex::new(Bucket::new(
                config.audio_bytes_per_second as f64,
                config.burst_multiplier as f64,
            ))),
        }
    }

    pub fn check_message(&self) -> Result<(), RateLimitError> {
        match &self.messages {
            Some(bucket) if !bucket.lock().try_take(1.0) => Err(RateLimitError::Messages),
            _ => Ok(()),
        }
    }

    pub fn check_audio_bytes(&self, bytes: usize) -> Result<(), RateLimitError> {
        match &self.audio_bytes {
            Some(bucket) if !bucket.lock().try_take(bytes as f64) => Err(RateLimitError::AudioBytes),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> RateLimitConfig {
        RateLimitConfig {
            enabled,
            messages_per_second: 10,
            audio_bytes_per_second: 1000,
            burst_multiplier: 1.0,
        }
    }

    #[test]
    fn disabled_limiter_never_rejects() {
        let limiter = RateLimiter::new(&config(false));
        for _ in 0..1000 {
            assert!(limiter.check_message().is_ok());
        }
    }

    #[test]
    fn burst_past_capacity_is_rejected() {
        let limiter = RateLimiter::new(&config(true));
        for _ in 0..10 {
            assert!(limiter.check_message().is_ok());
        }
        assert!(limiter.check_message().is_err());
    }

    #[test]
    fn audio_bytes_bucket_is_independent_of_message_bucket() {
        let limiter = RateLimiter::new(&config(true));
        assert!(limiter.check_audio_bytes(1000).is_ok());
        assert!(limiter.check_audio_bytes(1).is_err());
        assert!(limiter.check_message().is_ok());
    }
}

//! The Session root aggregate and the registry that indexes sessions by
//! both connection id and session id (§3, §4.2). The registry's map is
//! accessed by many connections concurrently, hence the literal
//! `parking_lot::RwLock<HashMap<...>>` the concurrency model calls for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use gateway_core::{GatewayId, SampleRate, SessionId};
use gateway_llm::LlmEngine;
use gateway_pipeline::{SttSession, TtsSession};

use crate::error::{GatewayError, Result};
use crate::rate_limit::RateLimiter;

/// Identifies a client's transport connection, independent of the session
/// id allocated for it — today the two are allocated together at accept
/// time, but indexing separately is what lets a future reconnect flow
/// attach an existing session to a fresh connection without renumbering it.
pub type ConnectionId = GatewayId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    ShuttingDown,
}

/// One client connection's Session (root aggregate, §3). Owns the three
/// sub-sessions; `None` until `audio.input.start` spins them up.
pub struct Session {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub created_at: DateTime<Utc>,
    started_at: Instant,
    last_activity: Mutex<Instant>,
    state: Mutex<SessionState>,
    source_sample_rate: Mutex<Option<SampleRate>>,
    language: Mutex<Option<String>>,
    metadata: Mutex<HashMap<String, String>>,

    pub stt: RwLock<Option<Arc<SttSession>>>,
    pub llm: RwLock<Option<Arc<LlmEngine>>>,
    pub tts: RwLock<Option<Arc<TtsSession>>>,

    pub rate_limiter: RateLimiter,
}

impl Session {
    fn new(session_id: SessionId, connection_id: ConnectionId, rate_limiter: RateLimiter) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            connection_id,
            created_at: Utc::now(),
            started_at: now,
            last_activity: Mutex::new(now),
            state: Mutex::new(SessionState::Active),
            source_sample_rate: Mutex::new(None),
            language: Mutex::new(None),
            metadata: Mutex::new(HashMap::new()),
            stt: RwLock::new(None),
            llm: RwLock::new(None),
            tts: RwLock::new(None),
            rate_limiter,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn total_duration(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn set_audio_format(&self, sample_rate: SampleRate, language: String) {
        *self.source_sample_rate.lock() = Some(sample_rate);
        *self.language.lock() = Some(language);
    }

    pub fn source_sample_rate(&self) -> Option<SampleRate> {
        *self.source_sample_rate.lock()
    }

    pub fn insert_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.lock().insert(key.into(), value.into());
    }

    pub fn is_started(&self) -> bool {
        self.stt.read().is_some()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn mark_shutting_down(&self) {
        *self.state.lock() = SessionState::ShuttingDown;
    }

    /// Tear down all three sub-sessions. Dropping the `Arc`s closes each
    /// upstream connection's writer task; this is intentionally the only
    /// cleanup step today (no sub-session exposes an explicit `close()`),
    /// so callers still race it against a timeout for the shutdown
    /// guarantee even though in practice it resolves immediately.
    pub async fn cleanup(&self) {
        self.mark_shutting_down();
        self.stt.write().take();
        self.llm.write().take();
        self.tts.write().take();
    }
}

/// Indexes sessions by connection id and session id; enforces the
/// per-process concurrent-session cap and the shutdown-in-progress flag
/// (§4.2).
pub struct SessionRegistry {
    by_session: RwLock<HashMap<SessionId, Arc<Session>>>,
    by_connection: RwLock<HashMap<ConnectionId, SessionId>>,
    max_concurrent_sessions: usize,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            by_session: RwLock::new(HashMap::new()),
            by_connection: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a new connection, allocating a fresh session id. Rejects
    /// with `ShuttingDown` or `SessionCapExceeded` per the hard limits in
    /// §4.2.
    pub fn register(&self, rate_limiter: RateLimiter) -> Result<Arc<Session>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(GatewayError::ShuttingDown);
        }

        let mut by_session = self.by_session.write();
        if by_session.len() >= self.max_concurrent_sessions {
            return Err(GatewayError::SessionCapExceeded);
        }

        let connection_id = ConnectionId::new();
        let session_id = SessionId::new();
        let session = Arc::new(Session::new(session_id, connection_id, rate_limiter));

        by_session.insert(session_id, session.clone());
        self.by_connection.write().insert(connection_id, session_id);

        Ok(session)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.by_session.read().get(&session_id).cloned()
    }

    pub fn get_by_connection(&self, connection_id: ConnectionId) -> Option<Arc<Session>> {
        let session_id = *self.by_connection.read().get(&connection_id)?;
        self.get(session_id)
    }

    pub fn remove(&self, session_id: SessionId) -> Option<Arc<Session>> {
        let session = self.by_session.write().remove(&session_id)?;
        self.by_connection.write().remove(&session.connection_id);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.by_session.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.by_session.read().values().cloned().collect()
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_config::RateLimitConfig;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn register_indexes_by_both_connection_and_session_id() {
        let registry = SessionRegistry::new(10);
        let session = registry.register(limiter()).unwrap();

        assert!(registry.get(session.session_id).is_some());
        assert!(registry.get_by_connection(session.connection_id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cap_is_enforced() {
        let registry = SessionRegistry::new(1);
        registry.register(limiter()).unwrap();
        assert!(matches!(
            registry.register(limiter()),
            Err(GatewayError::SessionCapExceeded)
        ));
    }

    #[test]
    fn shutdown_flag_rejects_new_sessions() {
        let registry = SessionRegistry::new(10);
        registry.begin_shutdown();
        assert!(matches!(registry.register(limiter()), Err(GatewayError::ShuttingDown)));
    }

    #[test]
    fn remove_clears_both_indexes() {
        let registry = SessionRegistry::new(10);
        let session = registry.register(limiter()).unwrap();
        let connection_id = session.connection_id;

        registry.remove(session.session_id);
        assert!(registry.get(session.session_id).is_none());
        assert!(registry.get_by_connection(connection_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn fresh_session_has_no_sub_sessions_started() {
        let registry = SessionRegistry::new(10);
        let session = registry.register(limiter()).unwrap();
        assert!(!session.is_started());
    }
}

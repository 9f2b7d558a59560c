//! The resource manager (§4.8): a single periodic sweeper that ends idle or
//! over-duration sessions, plus shutdown coordination that races each
//! session's cleanup against a per-session timeout.

use std::sync::Arc;
use std::time::Duration;

use gateway_pipeline::ConnectionState;
use tokio::task::JoinHandle;

use crate::metrics;
use crate::registry::{Session, SessionRegistry};

pub struct ResourceManager {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    max_duration: Duration,
    sweep_interval: Duration,
    shutdown_per_session_timeout: Duration,
}

impl ResourceManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        idle_timeout: Duration,
        max_duration: Duration,
        sweep_interval: Duration,
        shutdown_per_session_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            idle_timeout,
            max_duration,
            sweep_interval,
            shutdown_per_session_timeout,
        }
    }

    /// Spawn the periodic sweep loop. The handle is only used by shutdown to
    /// abort it; the loop itself runs until aborted or the process exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }

    async fn sweep_once(&self) {
        let sessions = self.registry.all();
        metrics::record_live_sessions(sessions.len());

        let mut ended = 0usize;
        for session in sessions {
            if self.should_end(&session) {
                self.end_session(&session).await;
                ended += 1;
            }
        }
        if ended > 0 {
            tracing::info!(ended, "resource manager swept idle/expired sessions");
        }
    }

    fn should_end(&self, session: &Session) -> bool {
        if session.idle_duration() > self.idle_timeout {
            return true;
        }
        if session.total_duration() > self.max_duration {
            return true;
        }
        if !session.is_started() {
            return false;
        }
        let stt_dead = session
            .stt
            .read()
            .as_ref()
            .map(|stt| stt.state() == ConnectionState::Disconnected)
            .unwrap_or(false);
        let tts_dead = session
            .tts
            .read()
            .as_ref()
            .map(|tts| tts.state() == ConnectionState::Disconnected)
            .unwrap_or(false);
        stt_dead || tts_dead
    }

    async fn end_session(&self, session: &Session) {
        session.cleanup().await;
        self.registry.remove(session.session_id);
        tracing::info!(session_id = %session.session_id, "session ended by resource manager");
    }

    /// Mark the process shutting down, stop accepting new sessions, and
    /// race every active session's cleanup against the configured timeout.
    /// Stragglers are force-cleaned (their cleanup future is simply dropped
    /// once the timeout fires, since today's cleanup is non-blocking).
    pub async fn shutdown(&self) {
        self.registry.begin_shutdown();
        let sessions = self.registry.all();
        tracing::info!(count = sessions.len(), "shutting down active sessions");

        let mut stragglers = 0usize;
        for session in sessions {
            let result = tokio::time::timeout(self.shutdown_per_session_timeout, session.cleanup()).await;
            if result.is_err() {
                stragglers += 1;
            }
            self.registry.remove(session.session_id);
        }
        if stragglers > 0 {
            tracing::warn!(stragglers, "force-cleaned sessions past shutdown timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimiter;
    use gateway_config::RateLimitConfig;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    fn manager(registry: Arc<SessionRegistry>) -> ResourceManager {
        ResourceManager::new(
            registry,
            Duration::from_millis(50),
            Duration::from_secs(3600),
            Duration::from_secs(300),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn idle_session_past_bound_is_swept() {
        let registry = Arc::new(SessionRegistry::new(10));
        let session = registry.register(limiter()).unwrap();
        let manager = manager(registry.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.sweep_once().await;

        assert!(registry.get(session.session_id).is_none());
    }

    #[tokio::test]
    async fn fresh_session_is_not_swept() {
        let registry = Arc::new(SessionRegistry::new(10));
        let session = registry.register(limiter()).unwrap();
        let manager = manager(registry.clone());

        manager.sweep_once().await;

        assert!(registry.get(session.session_id).is_some());
    }

    #[tokio::test]
    async fn shutdown_marks_registry_and_clears_sessions() {
        let registry = Arc::new(SessionRegistry::new(10));
        registry.register(limiter()).unwrap();
        let manager = manager(registry.clone());

        manager.shutdown().await;

        assert!(registry.is_shutting_down());
        assert!(registry.is_empty());
    }
}

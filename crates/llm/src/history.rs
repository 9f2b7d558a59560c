//! Per-session conversation history, a bounded FIFO request queue, and
//! tiered fallback on upstream failure (§4.5).

use std::sync::Arc;

use gateway_config::LlmConfig;
use gateway_core::{Turn, TurnRole};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};

use crate::backend::{LlmBackend, StreamEvent};
use crate::error::{LlmError, Result};
use crate::streamer::SemanticStreamer;

/// A completed turn pair, reported back to the caller for logging.
#[derive(Debug, Clone)]
pub struct LlmTurn {
    pub user_text: String,
    pub response_text: String,
    pub was_fallback: bool,
}

struct State {
    history: Vec<Turn>,
    consecutive_failures: u32,
}

/// One session's LLM sub-session: history, request queue, tiered fallback,
/// and delegation to the semantic streamer on every success.
///
/// `admission` caps how many requests may be outstanding (in flight or
/// queued) at once — past that, `submit` rejects with `QueueFull`. The
/// permit is held for the whole in-flight call, so capacity is sized to
/// `queue_bound` additional queued requests plus the one currently running.
/// `processing` is a FIFO async mutex that serializes actual upstream
/// calls, giving the "one busy request, rest queue in order" shape without
/// a hand-rolled queue.
pub struct LlmEngine {
    backend: Arc<dyn LlmBackend>,
    streamer: SemanticStreamer,
    state: Mutex<State>,
    admission: Semaphore,
    processing: AsyncMutex<()>,
}

impl LlmEngine {
    pub fn new(backend: Arc<dyn LlmBackend>, config: &LlmConfig, streamer: SemanticStreamer) -> Self {
        let history = vec![Turn::system(config.system_prompt.clone())];
        Self {
            backend,
            streamer,
            state: Mutex::new(State {
                history,
                consecutive_failures: 0,
            }),
            admission: Semaphore::new(config.queue_bound.max(1) + 1),
            processing: AsyncMutex::new(()),
        }
    }

    /// Submit a user turn. Queues behind any in-flight request up to the
    /// configured bound; rejects with `QueueFull` past that.
    pub async fn submit(&self, text: String) -> Result<LlmTurn> {
        let _permit = self
            .admission
            .try_acquire()
            .map_err(|_| LlmError::QueueFull)?;

        let _processing = self.processing.lock().await;
        self.run_one(text).await
    }

    /// Run a single request to completion: append the user turn, call the
    /// backend, apply tiered fallback on failure, append the response, and
    /// hand the response to the semantic streamer.
    async fn run_one(&self, text: String) -> Result<LlmTurn> {
        let history_snapshot = {
            let mut state = self.state.lock();
            state.history.push(Turn::user(text.clone()));
            state.history.clone()
        };

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(32);
        let generation = tokio::spawn({
            let backend = self.backend.clone();
            async move { backend.generate_stream(&history_snapshot, tx).await }
        });

        while rx.recv().await.is_some() {}

        match generation.await {
            Ok(Ok(response_text)) => {
                {
                    let mut state = self.state.lock();
                    state.consecutive_failures = 0;
                    state.history.push(Turn::assistant(response_text.clone()));
                }
                let _ = self.streamer.dispatch(&response_text).await;
                Ok(LlmTurn {
                    user_text: text,
                    response_text,
                    was_fallback: false,
                })
            }
            Ok(Err(_err)) | Err(_) => {
                let tier = {
                    let mut state = self.state.lock();
                    state.consecutive_failures += 1;
                    state.consecutive_failures
                };
                let fallback = tiered_fallback(tier);
                self.state.lock().history.push(Turn::assistant(fallback.clone()));
                let _ = self.streamer.dispatch(&fallback).await;
                Ok(LlmTurn {
                    user_text: text,
                    response_text: fallback,
                    was_fallback: true,
                })
            }
        }
    }

    pub fn history(&self) -> Vec<Turn> {
        self.state.lock().history.clone()
    }
}

/// Canned degradation message keyed by consecutive-failure count (§4.5).
/// Tier 3+ implies terminal degradation for this session.
pub fn tiered_fallback(consecutive_failures: u32) -> String {
    match consecutive_failures {
        0 | 1 => "Sorry, I'm having a little trouble right now. Could you say that again?".to_string(),
        2 => "I'm still having trouble reaching our systems. Let's try once more.".to_string(),
        _ => {
            "I'm sorry, I'm unable to continue this conversation right now. Someone will call you back shortly."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBackend;

    #[async_trait::async_trait]
    impl LlmBackend for NoopBackend {
        async fn generate_stream(
            &self,
            _history: &[Turn],
            _tx: mpsc::Sender<StreamEvent>,
        ) -> Result<String> {
            Ok("hi there".to_string())
        }
        fn model_name(&self) -> &str {
            "noop"
        }
    }

    struct FailingBackend;

    #[async_trait::async_trait]
    impl LlmBackend for FailingBackend {
        async fn generate_stream(
            &self,
            _history: &[Turn],
            _tx: mpsc::Sender<StreamEvent>,
        ) -> Result<String> {
            Err(LlmError::Network("down".to_string()))
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn test_config() -> LlmConfig {
        LlmConfig {
            system_prompt: "be terse".to_string(),
            queue_bound: 3,
            ..Default::default()
        }
    }

    #[test]
    fn tier_one_and_two_are_distinct_from_terminal_tier() {
        let t1 = tiered_fallback(1);
        let t2 = tiered_fallback(2);
        let t3 = tiered_fallback(3);
        assert_ne!(t1, t3);
        assert_ne!(t2, t3);
        assert!(t3.to_lowercase().contains("call"));
    }

    #[test]
    fn tier_saturates_past_three() {
        assert_eq!(tiered_fallback(3), tiered_fallback(10));
    }

    #[test]
    fn new_engine_seeds_history_with_system_prompt() {
        let engine = LlmEngine::new(
            Arc::new(NoopBackend),
            &test_config(),
            SemanticStreamer::new(Default::default(), None),
        );
        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, TurnRole::System);
        assert_eq!(history[0].content, "be terse");
    }

    #[tokio::test]
    async fn successful_turn_appends_user_and_assistant_and_resets_failures() {
        let engine = LlmEngine::new(
            Arc::new(NoopBackend),
            &test_config(),
            SemanticStreamer::new(Default::default(), None),
        );
        let turn = engine.submit("hello".to_string()).await.unwrap();
        assert!(!turn.was_fallback);
        assert_eq!(turn.response_text, "hi there");

        let history = engine.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, TurnRole::User);
        assert_eq!(history[2].role, TurnRole::Assistant);
        assert_eq!(history[2].content, "hi there");
    }

    #[tokio::test]
    async fn failures_escalate_through_fallback_tiers() {
        let engine = LlmEngine::new(
            Arc::new(FailingBackend),
            &test_config(),
            SemanticStreamer::new(Default::default(), None),
        );
        let first = engine.submit("one".to_string()).await.unwrap();
        let second = engine.submit("two".to_string()).await.unwrap();
        let third = engine.submit("three".to_string()).await.unwrap();

        assert!(first.was_fallback && second.was_fallback && third.was_fallback);
        assert_ne!(first.response_text, third.response_text);
        assert_eq!(third.response_text, tiered_fallback(3));
    }

    struct SlowBackend;

    #[async_trait::async_trait]
    impl LlmBackend for SlowBackend {
        async fn generate_stream(
            &self,
            _history: &[Turn],
            _tx: mpsc::Sender<StreamEvent>,
        ) -> Result<String> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok("slow reply".to_string())
        }
        fn model_name(&self) -> &str {
            "slow"
        }
    }

    /// With `queue_bound = 1`, admission covers 1 in-flight request plus 1
    /// queued request: the first submission holds the in-flight slot, the
    /// second is admitted and queues behind it, and only the third rejects.
    #[tokio::test]
    async fn queue_bound_rejects_once_every_slot_is_occupied() {
        let mut config = test_config();
        config.queue_bound = 1;
        let engine = Arc::new(LlmEngine::new(
            Arc::new(SlowBackend),
            &config,
            SemanticStreamer::new(Default::default(), None),
        ));

        let held = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit("first".to_string()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let queued = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit("second".to_string()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let rejected = engine.submit("third".to_string()).await;
        assert!(matches!(rejected, Err(LlmError::QueueFull)));

        let first_result = held.await.unwrap().unwrap();
        assert!(!first_result.was_fallback);
        let second_result = queued.await.unwrap().unwrap();
        assert!(!second_result.was_fallback);
    }
}

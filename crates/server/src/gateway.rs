//! The WebSocket gateway handler (§4.1, §4.2): terminates one client
//! connection, decodes/dispatches frames, and wires the session's STT/LLM/
//! TTS sub-sessions together for the lifetime of the connection.
//!
//! Inbound handlers enqueue to the appropriate sub-session and return; they
//! never hold blocking work. The only per-connection state kept here is the
//! registration of the underlying connection (the `Session` itself lives in
//! the registry).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use gateway_core::{Classified, EventId, SampleRate};
use gateway_llm::{LlmEngine, SemanticStreamer};
use gateway_pipeline::{SttEvent, SttSession, TtsEvent, TtsSession};

use crate::error::GatewayError;
use crate::metrics;
use crate::protocol::{self, event_type, AudioInputStartPayload, InboundEnvelope};
use crate::rate_limit::RateLimiter;
use crate::registry::Session;
use crate::state::AppState;

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let rate_limiter = RateLimiter::new(&state.settings.server.rate_limit);
    let session = match state.registry.register(rate_limiter) {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "connection rejected before session registration");
            return;
        }
    };

    let session_id = session.session_id;
    tracing::info!(%session_id, "session registered");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    send_frame(&out_tx, &protocol::connection_ack(session_id));

    while let Some(frame) = ws_rx.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "client transport error, ending session");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if let Err((request_type, event_id, err)) =
                    handle_text(&state, &session, &out_tx, text.as_str()).await
                {
                    tracing::warn!(error = %err, kind = ?err.kind(), "inbound frame rejected");
                    send_frame(
                        &out_tx,
                        &protocol::error_frame(
                            session_id,
                            event_id.unwrap_or_else(EventId::new),
                            &request_type,
                            err.to_string(),
                        ),
                    );
                }
            }
            Message::Binary(data) => {
                if let Err(err) = handle_binary(&session, data) {
                    tracing::debug!(error = %err, "audio chunk rejected");
                    send_frame(
                        &out_tx,
                        &protocol::error_frame(
                            session_id,
                            EventId::new(),
                            event_type::AUDIO_INPUT_CHUNK,
                            err.to_string(),
                        ),
                    );
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    tracing::info!(%session_id, "session ending, cleaning up sub-sessions");
    session.cleanup().await;
    state.registry.remove(session_id);
    writer.abort();
}

async fn handle_text(
    state: &AppState,
    session: &Arc<Session>,
    out_tx: &UnboundedSender<Message>,
    text: &str,
) -> Result<(), (String, Option<EventId>, GatewayError)> {
    session.touch();
    session.rate_limiter.check_message().map_err(|err| {
        ("unknown".to_string(), None, GatewayError::RateLimited(err.to_string()))
    })?;
    let envelope: InboundEnvelope = serde_json::from_str(text).map_err(|err| {
        ("unknown".to_string(), None, GatewayError::InvalidFrame(err.to_string()))
    })?;
    let request_type = envelope.event_type.clone();
    let event_id = envelope.event_id;

    let result = dispatch_text(state, session, out_tx, envelope).await;
    result.map_err(|err| (request_type, event_id, err))
}

async fn dispatch_text(
    state: &AppState,
    session: &Arc<Session>,
    out_tx: &UnboundedSender<Message>,
    envelope: InboundEnvelope,
) -> Result<(), GatewayError> {
    match protocol::classify(&envelope.event_type) {
        Some((protocol::Direction::ServerToClient, _)) | None => {
            return Err(GatewayError::UnknownEventType(envelope.event_type));
        }
        Some(_) => {}
    }

    match envelope.event_type.as_str() {
        event_type::AUDIO_INPUT_START => start_sub_sessions(state, session, out_tx, envelope).await,
        event_type::AUDIO_INPUT_STOP => {
            let event_id = envelope.event_id.unwrap_or_else(EventId::new);
            finalize_utterance(session, out_tx, event_id).await
        }
        event_type::USER_ACTION_INTERRUPT => {
            tracing::warn!("user.action.interrupt received but mid-utterance cancellation is not implemented");
            Ok(())
        }
        other => Err(GatewayError::UnknownEventType(other.to_string())),
    }
}

fn handle_binary(session: &Session, data: Vec<u8>) -> Result<(), GatewayError> {
    session.touch();
    if !session.is_started() {
        return Err(GatewayError::SessionNotStarted);
    }
    session
        .rate_limiter
        .check_audio_bytes(data.len())
        .map_err(|err| GatewayError::RateLimited(err.to_string()))?;

    let source_rate = session.source_sample_rate().unwrap_or(SampleRate::Hz48000);
    let stt = session.stt.read().clone().ok_or(GatewayError::SessionNotStarted)?;
    stt.forward_chunk(&data, source_rate);
    Ok(())
}

async fn start_sub_sessions(
    state: &AppState,
    session: &Arc<Session>,
    out_tx: &UnboundedSender<Message>,
    envelope: InboundEnvelope,
) -> Result<(), GatewayError> {
    let payload: AudioInputStartPayload = serde_json::from_value(envelope.payload)
        .map_err(|err| GatewayError::InvalidFrame(err.to_string()))?;
    let source_rate = SampleRate::from_u32(payload.sample_rate_hz)
        .ok_or(gateway_core::CoreError::InvalidSampleRate(payload.sample_rate_hz))?;

    if session.is_started() {
        tracing::warn!("audio.input.start received twice, ignoring");
        return Ok(());
    }

    session.set_audio_format(source_rate, payload.language);

    let stt = Arc::new(SttSession::connect(session.session_id, state.settings.stt.clone()).await?);
    let tts = Arc::new(TtsSession::connect(session.session_id, state.settings.tts.clone()).await?);
    let streamer = SemanticStreamer::new(state.settings.chunking.clone(), Some(tts.clone()));
    let llm = Arc::new(LlmEngine::new(
        state.llm_backend.clone(),
        &state.settings.llm,
        streamer,
    ));

    spawn_stt_forwarder(session.session_id, stt.clone(), out_tx.clone());
    spawn_tts_forwarder(session.session_id, tts.clone(), out_tx.clone());

    *session.stt.write() = Some(stt);
    *session.tts.write() = Some(tts);
    *session.llm.write() = Some(llm);

    tracing::info!(sample_rate = payload.sample_rate_hz, "sub-sessions started");
    Ok(())
}

async fn finalize_utterance(
    session: &Arc<Session>,
    out_tx: &UnboundedSender<Message>,
    event_id: EventId,
) -> Result<(), GatewayError> {
    let stt = session.stt.read().clone().ok_or(GatewayError::SessionNotStarted)?;
    let llm = session.llm.read().clone().ok_or(GatewayError::SessionNotStarted)?;

    let transcript = stt.finalize().await;
    send_frame(out_tx, &protocol::transcript_final(session.session_id, transcript.clone()));

    if transcript.trim().is_empty() {
        tracing::debug!("finalization produced an empty transcript, skipping llm submission");
        return Ok(());
    }

    let session_id = session.session_id;
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        match llm.submit(transcript).await {
            Ok(turn) => {
                if turn.was_fallback {
                    metrics::record_tiered_fallback(1);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "llm submission failed");
                send_frame(
                    &out_tx,
                    &protocol::error_frame(session_id, event_id, event_type::AUDIO_INPUT_STOP, err.to_string()),
                );
            }
        }
    });

    Ok(())
}

fn spawn_stt_forwarder(
    session_id: gateway_core::SessionId,
    stt: Arc<SttSession>,
    out_tx: UnboundedSender<Message>,
) {
    let Some(mut events) = stt.take_events() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SttEvent::Interim(text) => {
                    send_frame(&out_tx, &protocol::transcript_interim(session_id, text));
                }
                SttEvent::Final(_) => {
                    // Accumulated finals are surfaced through the explicit
                    // finalization handshake; interim streaming keeps the
                    // client's live transcript up to date in the meantime.
                }
                SttEvent::ConnectionState(state) => {
                    metrics::record_connection_state("stt", state);
                    if state == gateway_pipeline::ConnectionState::Reconnecting {
                        metrics::record_reconnect("stt");
                    }
                }
                SttEvent::Error(message) => {
                    send_frame(
                        &out_tx,
                        &protocol::error_frame(
                            session_id,
                            EventId::new(),
                            event_type::AUDIO_INPUT_CHUNK,
                            message,
                        ),
                    );
                }
            }
        }
    });
}

fn spawn_tts_forwarder(
    session_id: gateway_core::SessionId,
    tts: Arc<TtsSession>,
    out_tx: UnboundedSender<Message>,
) {
    let Some(mut events) = tts.take_events() else {
        return;
    };
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TtsEvent::Start { utterance_id, event_id } => {
                    send_frame(
                        &out_tx,
                        &protocol::audio_output_start(session_id, event_id, utterance_id),
                    );
                }
                TtsEvent::Chunk { data, .. } => {
                    let _ = out_tx.send(Message::Binary(data));
                }
                TtsEvent::Complete {
                    utterance_id,
                    event_id,
                    duration_ms,
                } => {
                    send_frame(
                        &out_tx,
                        &protocol::audio_output_complete(session_id, event_id, utterance_id, duration_ms),
                    );
                }
                TtsEvent::Error { event_id, message, .. } => {
                    send_frame(
                        &out_tx,
                        &protocol::error_frame(session_id, event_id, event_type::AUDIO_OUTPUT_CHUNK, message),
                    );
                }
                TtsEvent::Truncated { .. } => {
                    metrics::record_tts_truncation();
                }
                TtsEvent::ConnectionState(state) => {
                    metrics::record_connection_state("tts", state);
                    if state == gateway_pipeline::ConnectionState::Reconnecting {
                        metrics::record_reconnect("tts");
                    }
                }
            }
        }
    });
}

fn send_frame<P: Serialize>(out_tx: &UnboundedSender<Message>, frame: &gateway_core::Frame<P>) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = out_tx.send(Message::Text(json));
        }
        Err(err) => {
            tracing::error!(error = %err, event_type = %frame.event_type, "failed to serialize outbound frame");
        }
    }
}

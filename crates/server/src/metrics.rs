//! Prometheus metrics surface (§6). Bound on its own port, separate from
//! the client-facing WebSocket port, via `metrics-exporter-prometheus`.

use std::net::SocketAddr;

use gateway_pipeline::ConnectionState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_gauge!("gateway_live_sessions", "Number of sessions currently registered");
    describe_gauge!(
        "gateway_connection_state",
        "STT/TTS sub-session connection state, labeled sub_session + state (1 = currently in that state)"
    );
    describe_counter!("gateway_stt_reconnects_total", "STT upstream reconnect attempts");
    describe_counter!("gateway_tts_reconnects_total", "TTS upstream reconnect attempts");
    describe_counter!(
        "gateway_finalization_winner_total",
        "STT finalization race winner, labeled event|timeout"
    );
    describe_counter!("gateway_queue_overflow_total", "LLM request queue overflow rejections");
    describe_counter!(
        "gateway_tiered_fallback_total",
        "LLM tiered fallback responses served, labeled by tier"
    );
    describe_histogram!("gateway_stt_roundtrip_ms", "STT finalize round-trip latency");
    describe_histogram!("gateway_llm_ttft_ms", "LLM time to first token");
    describe_histogram!("gateway_llm_total_ms", "LLM total completion latency");
    describe_histogram!("gateway_tts_ttfb_ms", "TTS time to first byte");
    describe_histogram!("gateway_tts_total_ms", "TTS total synthesis latency");
    describe_counter!(
        "gateway_dropped_chunks_total",
        "Chunks dropped from a bounded buffer, labeled by buffer name"
    );
    describe_counter!(
        "gateway_tts_truncations_total",
        "Synthesis requests truncated at max_text_length"
    );
}

pub fn record_live_sessions(count: usize) {
    gauge!("gateway_live_sessions").set(count as f64);
}

pub fn record_connection_state(sub_session: &'static str, state: ConnectionState) {
    gauge!("gateway_connection_state", "sub_session" => sub_session, "state" => connection_state_label(state)).set(1.0);
}

pub fn record_reconnect(sub_session: &'static str) {
    counter!(format!("gateway_{sub_session}_reconnects_total")).increment(1);
}

pub fn record_finalization_winner(winner: &'static str) {
    counter!("gateway_finalization_winner_total", "winner" => winner).increment(1);
}

pub fn record_queue_overflow() {
    counter!("gateway_queue_overflow_total").increment(1);
}

pub fn record_tiered_fallback(tier: u32) {
    counter!("gateway_tiered_fallback_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_stt_roundtrip_ms(ms: u64) {
    histogram!("gateway_stt_roundtrip_ms").record(ms as f64);
}

pub fn record_llm_ttft_ms(ms: u64) {
    histogram!("gateway_llm_ttft_ms").record(ms as f64);
}

pub fn record_llm_total_ms(ms: u64) {
    histogram!("gateway_llm_total_ms").record(ms as f64);
}

pub fn record_tts_ttfb_ms(ms: u64) {
    histogram!("gateway_tts_ttfb_ms").record(ms as f64);
}

pub fn record_tts_total_ms(ms: u64) {
    histogram!("gateway_tts_total_ms").record(ms as f64);
}

pub fn record_dropped_chunks(buffer_name: &'static str, count: usize) {
    counter!("gateway_dropped_chunks_total", "buffer" => buffer_name).increment(count as u64);
}

pub fn record_tts_truncation() {
    counter!("gateway_tts_truncations_total").increment(1);
}

fn connection_state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Reconnecting => "reconnecting",
        ConnectionState::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_labels_are_stable() {
        assert_eq!(connection_state_label(ConnectionState::Connected), "connected");
        assert_eq!(connection_state_label(ConnectionState::Reconnecting), "reconnecting");
    }
}

//! The connection-state skeleton shared by the STT and TTS engines: both
//! hold exactly one persistent upstream WebSocket, reconnect with backoff
//! on unexpected close, and buffer outbound data while reconnecting.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{PipelineError, Result};

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state shared by every persistent-upstream engine (§4.4, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

/// Dial the upstream once, bounded by `connect_timeout`.
pub async fn connect(url: &str, connect_timeout: Duration) -> Result<UpstreamSocket> {
    let parsed = Url::parse(url)?;
    let (socket, _response) = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(parsed.as_str()),
    )
    .await
    .map_err(|_| PipelineError::ConnectTimeout)??;
    Ok(socket)
}

/// Reconnect with exponential backoff, up to `max_attempts`. Returns the
/// fresh socket or the last error once attempts are exhausted.
pub async fn reconnect_with_backoff(
    url: &str,
    connect_timeout: Duration,
    max_attempts: u32,
) -> Result<UpstreamSocket> {
    let mut attempt = 0;
    let mut backoff = Duration::from_millis(200);
    loop {
        attempt += 1;
        match connect(url, connect_timeout).await {
            Ok(socket) => return Ok(socket),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                tracing::warn!(attempt, max_attempts, error = %err, "upstream reconnect attempt failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(10));
            }
        }
    }
}

/// A byte-budgeted FIFO buffer used while an upstream connection is not
/// ready. Drops the oldest bytes once the budget is exceeded (§4.4).
#[derive(Debug, Default)]
pub struct ReconnectBuffer {
    budget: usize,
    chunks: std::collections::VecDeque<Vec<u8>>,
    buffered_len: usize,
    dropped_total: usize,
}

impl ReconnectBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            chunks: std::collections::VecDeque::new(),
            buffered_len: 0,
            dropped_total: 0,
        }
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        self.buffered_len += chunk.len();
        self.chunks.push_back(chunk);
        while self.buffered_len > self.budget {
            if let Some(oldest) = self.chunks.pop_front() {
                self.buffered_len -= oldest.len();
                self.dropped_total += oldest.len();
            } else {
                break;
            }
        }
    }

    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.buffered_len = 0;
        self.chunks.drain(..).collect()
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped_total
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_drops_oldest_bytes_past_budget() {
        let mut buffer = ReconnectBuffer::new(10);
        buffer.push(vec![0u8; 6]);
        buffer.push(vec![1u8; 6]);
        assert_eq!(buffer.dropped_total(), 6);
        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0], vec![1u8; 6]);
    }

    #[test]
    fn drain_preserves_order_and_empties_buffer() {
        let mut buffer = ReconnectBuffer::new(1000);
        buffer.push(vec![1]);
        buffer.push(vec![2]);
        buffer.push(vec![3]);
        assert_eq!(buffer.drain(), vec![vec![1], vec![2], vec![3]]);
        assert!(buffer.is_empty());
    }
}

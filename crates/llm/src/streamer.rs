//! Turn a completed LLM response into an ordered sequence of
//! semantically-bounded chunks and dispatch them to TTS one at a time,
//! pacing dispatch by each chunk's measured playback duration (§4.6).

use std::sync::Arc;

use gateway_config::ChunkingConfig;
use gateway_core::EventId;
use gateway_pipeline::TtsSession;

use crate::error::{LlmError, Result};

/// One semantically-bounded piece of text, ready for TTS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk(pub String);

pub struct SemanticStreamer {
    config: ChunkingConfig,
    tts: Option<Arc<TtsSession>>,
}

impl SemanticStreamer {
    pub fn new(config: ChunkingConfig, tts: Option<Arc<TtsSession>>) -> Self {
        Self { config, tts }
    }

    /// Extract chunks from the full response and dispatch each to TTS in
    /// order, sleeping for its playback duration before the next. Aborts on
    /// the first TTS failure and surfaces it; with no TTS session attached
    /// (tests, or a session that never established one) this just extracts.
    pub async fn dispatch(&self, response_text: &str) -> Result<Vec<Chunk>> {
        let chunks = extract_chunks(response_text, &self.config);

        let Some(tts) = &self.tts else {
            return Ok(chunks);
        };

        for chunk in &chunks {
            let duration = tts
                .synthesize(&chunk.0, EventId::new())
                .await
                .map_err(|err| LlmError::Api(format!("tts dispatch failed: {err}")))?;
            tokio::time::sleep(duration).await;
        }

        Ok(chunks)
    }
}

/// Split a complete response into ordered chunks: marker-based if the
/// break marker appears at least once, sentence-terminator fallback
/// otherwise.
pub fn extract_chunks(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.contains(config.break_marker.as_str()) {
        text.split(config.break_marker.as_str())
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
            .flat_map(|piece| split_by_safety_cap(piece, config.safety_byte_cap))
            .map(Chunk)
            .collect()
    } else {
        sentence_fallback_chunks(text, config)
            .into_iter()
            .map(Chunk)
            .collect()
    }
}

/// Force-split a piece that exceeds the safety byte cap, on whitespace
/// boundaries, so no single chunk ever grows unbounded (§4.6 safety bound).
fn split_by_safety_cap(text: &str, cap: usize) -> Vec<String> {
    if text.len() <= cap || cap == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > cap {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split on sentence terminators and greedily group into chunks bounded by
/// min/max words and a max character count.
fn sentence_fallback_chunks(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_words = 0usize;

    for sentence in sentences {
        let sentence_words = sentence.split_whitespace().count();
        let would_exceed = current_words + sentence_words > config.max_words_per_chunk
            || current.len() + sentence.len() > config.max_chars_per_chunk;

        if !current.is_empty() && would_exceed && current_words >= config.min_words_per_chunk {
            chunks.push(std::mem::take(&mut current));
            current_words = 0;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
        current_words += sentence_words;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }
    let trailing = current.trim().to_string();
    if !trailing.is_empty() {
        sentences.push(trailing);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            break_marker: "||BREAK||".to_string(),
            safety_byte_cap: 400,
            min_words_per_chunk: 5,
            max_words_per_chunk: 50,
            max_chars_per_chunk: 300,
        }
    }

    #[test]
    fn marker_based_split_drops_empty_pieces_and_preserves_order() {
        let chunks = extract_chunks("Hi ||BREAK|| there ||BREAK|| ", &config());
        assert_eq!(chunks, vec![Chunk("Hi".to_string()), Chunk("there".to_string())]);
    }

    #[test]
    fn no_marker_falls_back_to_sentence_grouping() {
        let text = "This is one sentence. This is another sentence. And a third one here.";
        let chunks = extract_chunks(text, &config());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.0.split_whitespace().count() <= config().max_words_per_chunk);
        }
    }

    #[test]
    fn safety_cap_forces_split_on_overlong_marker_piece() {
        let long_piece = "word ".repeat(200);
        let text = format!("{long_piece}||BREAK||done");
        let chunks = extract_chunks(&text, &config());
        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(chunk.0.len() <= 400 + "word".len());
        }
    }

    #[test]
    fn sentence_fallback_respects_min_words_before_splitting() {
        let text = "Hi. Yo. Ok. This is a longer trailing sentence that keeps going on.";
        let chunks = sentence_fallback_chunks(text, &config());
        // short sentences accumulate together until the min word bound is met
        assert!(chunks[0].split_whitespace().count() >= config().min_words_per_chunk || chunks.len() == 1);
    }

    #[test]
    fn empty_response_yields_no_chunks() {
        assert!(extract_chunks("", &config()).is_empty());
    }
}

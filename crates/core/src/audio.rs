//! PCM sample rates and the linear-interpolation resampler.
//!
//! The resampler is stateless and operates directly on interleaved 16-bit
//! signed little-endian PCM byte slices — no intermediate float frame type,
//! no VAD, no energy metering. Higher fidelity is an explicit non-goal.

use serde::{Deserialize, Serialize};

/// Supported audio sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - telephony
    Hz8000,
    /// 16kHz - STT/TTS upstream native rate
    #[default]
    Hz16000,
    /// 22.05kHz
    Hz22050,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - typical client capture/playback rate
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Bytes per 100ms chunk at this rate, mono 16-bit PCM.
    pub fn bytes_per_100ms(&self) -> usize {
        (self.as_u32() as usize / 10) * 2
    }
}

/// Normalization constant for i16 <-> f64 conversion during interpolation.
const PCM16_SCALE: f64 = 32767.0;

/// Convert interleaved 16-bit signed PCM mono samples from `source` rate to
/// `target` rate using linear interpolation.
///
/// Contract (see component spec for the resampler): stateless; empty input
/// yields empty output; equal rates is a passthrough with no allocation;
/// any internal error returns the original bytes unchanged rather than
/// raising, since a resample failure must never take down a session.
pub fn resample_pcm16(input: &[u8], source: SampleRate, target: SampleRate) -> Vec<u8> {
    if input.is_empty() {
        return Vec::new();
    }
    if source == target {
        return input.to_vec();
    }
    match try_resample(input, source, target) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(error = %e, "resample failed, returning input unchanged");
            input.to_vec()
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ResampleError {
    #[error("input length {0} is not a multiple of 2 (not valid 16-bit PCM)")]
    OddByteLength(usize),
}

fn try_resample(
    input: &[u8],
    source: SampleRate,
    target: SampleRate,
) -> Result<Vec<u8>, ResampleError> {
    if input.len() % 2 != 0 {
        return Err(ResampleError::OddByteLength(input.len()));
    }

    let samples: Vec<i16> = input
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    let ratio = target.as_u32() as f64 / source.as_u32() as f64;
    let out_len = (samples.len() as f64 * ratio).floor() as usize;

    let mut out = Vec::with_capacity(out_len * 2);
    let last_idx = samples.len().saturating_sub(1);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx_floor = src_pos.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(last_idx);
        let frac = src_pos - idx_floor as f64;

        let a = samples[idx_floor.min(last_idx)] as f64;
        let b = samples[idx_ceil] as f64;
        let interpolated = a + (b - a) * frac;
        let clamped = interpolated.clamp(-PCM16_SCALE - 1.0, PCM16_SCALE);
        out.extend_from_slice(&(clamped as i16).to_le_bytes());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_on_equal_rates() {
        let input: Vec<u8> = vec![1, 2, 3, 4, 5, 6];
        let out = resample_pcm16(&input, SampleRate::Hz16000, SampleRate::Hz16000);
        assert_eq!(out, input);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let out = resample_pcm16(&[], SampleRate::Hz48000, SampleRate::Hz16000);
        assert!(out.is_empty());
    }

    #[test]
    fn downsample_halves_sample_count() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let input: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = resample_pcm16(&input, SampleRate::Hz48000, SampleRate::Hz16000);
        assert_eq!(out.len() / 2, 160);
    }

    #[test]
    fn upsample_then_downsample_is_approximately_identity() {
        let samples: Vec<i16> = (0..160).map(|i| ((i as f64).sin() * 1000.0) as i16).collect();
        let input: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let up = resample_pcm16(&input, SampleRate::Hz16000, SampleRate::Hz48000);
        let back = resample_pcm16(&up, SampleRate::Hz48000, SampleRate::Hz16000);
        assert!((back.len() as i64 - input.len() as i64).unsigned_abs() <= 4);
    }

    #[test]
    fn odd_length_input_returns_unchanged() {
        let input: Vec<u8> = vec![1, 2, 3];
        let out = resample_pcm16(&input, SampleRate::Hz48000, SampleRate::Hz16000);
        assert_eq!(out, input);
    }

    #[test]
    fn bytes_per_100ms_matches_spec_sizes() {
        assert_eq!(SampleRate::Hz48000.bytes_per_100ms(), 9600);
        assert_eq!(SampleRate::Hz16000.bytes_per_100ms(), 3200);
    }
}

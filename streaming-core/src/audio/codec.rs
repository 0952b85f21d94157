//! Opus decode and PCM normalization (C1).
//!
//! Decoding keeps per-session state (the Opus decoder is stateful across
//! packets); normalization is a pure function of the samples it's given.

use crate::error::CodecError;
use opus::{Channels, Decoder};
use shared_protocol::{SUPPORTED_SAMPLE_RATES, TARGET_SAMPLE_RATE};

/// Stateful per-session Opus decoder. One instance must be kept alive for
/// the lifetime of a session — Opus packets depend on decoder state from
/// prior packets.
pub struct OpusSessionDecoder {
    decoder: Decoder,
    // Large enough for any single Opus frame at 16kHz mono; decode() fails
    // if the true output would not fit.
    scratch: Vec<i16>,
}

impl OpusSessionDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(TARGET_SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::DecodeError(e.to_string()))?;
        Ok(Self {
            decoder,
            scratch: vec![0i16; TARGET_SAMPLE_RATE as usize], // up to 1s per packet
        })
    }

    /// Decode one Opus packet to 16-bit PCM. A malformed packet returns
    /// `DecodeError` without poisoning decoder state for subsequent packets.
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples_decoded = self
            .decoder
            .decode(packet, &mut self.scratch, false)
            .map_err(|e| CodecError::DecodeError(e.to_string()))?;
        Ok(self.scratch[..samples_decoded].to_vec())
    }
}

/// Validate a sample rate and report it as an error otherwise.
pub fn validate_sample_rate(sample_rate: u32) -> Result<(), CodecError> {
    if SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
        Ok(())
    } else {
        Err(CodecError::UnsupportedSampleRate(sample_rate))
    }
}

/// Downmix, resample to 16kHz, and convert int16 PCM to float32 in [-1, 1].
///
/// `channels` multi-channel frames are assumed interleaved; downmixing
/// averages all channels per frame. 8kHz input is resampled to exactly
/// `2 * input_samples` via linear interpolation (ratio 2.0); 16kHz input
/// passes through unchanged apart from downmixing and format conversion.
pub fn normalize_pcm(
    samples: &[i16],
    source_rate: u32,
    channels: u16,
) -> Result<Vec<f32>, CodecError> {
    validate_sample_rate(source_rate)?;
    if channels == 0 {
        return Err(CodecError::InvalidChannelCount(channels));
    }

    let mono = downmix_to_mono(samples, channels);
    let resampled = if source_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample_linear(&mono, source_rate, TARGET_SAMPLE_RATE)
    };

    Ok(resampled
        .into_iter()
        .map(|s| s as f32 / 32768.0)
        .collect())
}

fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels == 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i64 = frame.iter().map(|&s| s as i64).sum();
            (sum / frame.len().max(1) as i64) as i16
        })
        .collect()
}

/// Linear-interpolation resample. Chosen for predictable latency and zero
/// external dependencies; acceptable because the downstream model
/// re-extracts features from the waveform anyway.
fn resample_linear(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if samples.is_empty() || source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).round() as usize;
    if output_len == 0 {
        return Vec::new();
    }

    let last_idx = (samples.len() - 1) as f64;
    (0..output_len)
        .map(|i| {
            let src_pos = if output_len <= 1 {
                0.0
            } else {
                i as f64 * last_idx / (output_len - 1) as f64
            };
            let lo = src_pos.floor() as usize;
            let hi = (lo + 1).min(samples.len() - 1);
            let frac = src_pos - lo as f64;
            let lo_val = samples[lo] as f64;
            let hi_val = samples[hi] as f64;
            (lo_val + (hi_val - lo_val) * frac).round().clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

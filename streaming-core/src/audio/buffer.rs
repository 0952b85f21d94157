//! Bounded ring of float32 samples with offset tracking (C2).

use std::collections::VecDeque;

/// A bounded window of audio samples. `offset_seconds` is the cumulative
/// duration of every sample ever evicted — the anchor that lets callers
/// translate timestamps the backend reports (relative to the start of the
/// audio it was given) back into the session's absolute timeline.
pub struct AudioBuffer {
    samples: VecDeque<f32>,
    sample_rate: u32,
    max_seconds: f64,
    offset_seconds: f64,
    total_duration_seconds: f64,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, max_seconds: f64) -> Self {
        Self {
            samples: VecDeque::new(),
            sample_rate,
            max_seconds,
            offset_seconds: 0.0,
            total_duration_seconds: 0.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn offset_seconds(&self) -> f64 {
        self.offset_seconds
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.total_duration_seconds
    }

    pub fn current_duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append samples, auto-trimming to `max_seconds` if needed. Returns the
    /// number of samples evicted by the trim this append triggered (0 if
    /// none).
    pub fn append(&mut self, new_samples: &[f32]) -> usize {
        self.samples.extend(new_samples.iter().copied());
        self.total_duration_seconds += new_samples.len() as f64 / self.sample_rate as f64;
        self.trim_to_seconds(self.max_seconds)
    }

    /// Retain only the most recent `seconds` of audio, advancing
    /// `offset_seconds` by whatever was dropped. Returns samples evicted.
    pub fn trim_to_seconds(&mut self, seconds: f64) -> usize {
        let max_samples = (seconds * self.sample_rate as f64).round() as usize;
        if self.samples.len() <= max_samples {
            return 0;
        }
        let evict = self.samples.len() - max_samples;
        self.evict(evict)
    }

    /// Drop everything before the given absolute session timestamp.
    pub fn trim_to_time(&mut self, absolute_seconds: f64) -> usize {
        if absolute_seconds <= self.offset_seconds {
            return 0;
        }
        let drop_seconds = absolute_seconds - self.offset_seconds;
        let evict = ((drop_seconds * self.sample_rate as f64).round() as usize).min(self.samples.len());
        self.evict(evict)
    }

    fn evict(&mut self, count: usize) -> usize {
        for _ in 0..count {
            self.samples.pop_front();
        }
        self.offset_seconds += count as f64 / self.sample_rate as f64;
        count
    }

    /// Current samples (contiguous copy) and the offset they're anchored to.
    pub fn get_audio(&self) -> (Vec<f32>, f64) {
        (self.samples.iter().copied().collect(), self.offset_seconds)
    }

    /// Discard samples but preserve `offset_seconds`.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Zero everything, including `offset_seconds` and the running total.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.offset_seconds = 0.0;
        self.total_duration_seconds = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_plus_current_equals_total() {
        let mut buf = AudioBuffer::new(16000, 2.0);
        for _ in 0..3 {
            buf.append(&vec![0.0f32; 16000]); // 1 second each
        }
        assert!((buf.current_duration_seconds() - 2.0).abs() < 1e-9);
        assert!((buf.offset_seconds() - 1.0).abs() < 1e-9);
        assert!((buf.total_duration_seconds() - 3.0).abs() < 1e-9);
        assert!(
            (buf.offset_seconds() + buf.current_duration_seconds() - buf.total_duration_seconds())
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn s3_buffer_trim_across_long_stream() {
        let mut buf = AudioBuffer::new(16000, 2.0);
        buf.append(&vec![0.0f32; 16000]);
        buf.append(&vec![0.0f32; 16000]);
        buf.append(&vec![0.0f32; 16000]);
        assert!((buf.current_duration_seconds() - 2.0).abs() < 1e-9);
        assert!((buf.offset_seconds() - 1.0).abs() < 1e-9);
        assert!((buf.total_duration_seconds() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn append_then_clear_preserves_offset() {
        let mut buf = AudioBuffer::new(16000, 1.0);
        buf.append(&vec![0.0f32; 32000]); // 2s in, trims to 1s
        let offset_before = buf.offset_seconds();
        buf.clear();
        assert_eq!(buf.offset_seconds(), offset_before);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn reset_zeroes_offset_and_total() {
        let mut buf = AudioBuffer::new(16000, 1.0);
        buf.append(&vec![0.0f32; 32000]);
        buf.reset();
        assert_eq!(buf.offset_seconds(), 0.0);
        assert_eq!(buf.total_duration_seconds(), 0.0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn trim_to_time_is_idempotent_for_past_timestamps() {
        let mut buf = AudioBuffer::new(16000, 10.0);
        buf.append(&vec![0.0f32; 16000]);
        buf.trim_to_time(0.5);
        let offset_after_first = buf.offset_seconds();
        buf.trim_to_time(0.1); // before current offset - no-op
        assert_eq!(buf.offset_seconds(), offset_after_first);
    }
}

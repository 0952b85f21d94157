//! Wake-word gate fronting a Session's strategy.
//!
//! The detector itself (a trained model scoring audio for phrase match) is
//! out of scope here; this module owns only the gating state machine and
//! its pre-roll buffer.

use std::collections::VecDeque;

/// Scores a chunk of audio for wake-word presence. Implementations are
/// provided by the embedding application; this crate only consumes the
/// trait.
pub trait WakeWordDetector: Send {
    fn score(&mut self, chunk: &[f32]) -> f32;
}

pub struct WakeWordGate<D: WakeWordDetector> {
    detector: D,
    threshold: f32,
    triggered: bool,
    preroll: VecDeque<f32>,
    preroll_capacity: usize,
}

impl<D: WakeWordDetector> WakeWordGate<D> {
    pub fn new(detector: D, threshold: f32, sample_rate: u32, preroll_seconds: f64) -> Self {
        let preroll_capacity = (sample_rate as f64 * preroll_seconds).round() as usize;
        Self {
            detector,
            threshold,
            triggered: false,
            preroll: VecDeque::with_capacity(preroll_capacity),
            preroll_capacity,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Feed one chunk through the gate. Returns the audio that should be
    /// forwarded to the strategy: empty before trigger, the pre-roll plus
    /// this chunk on the triggering call, and just this chunk afterward.
    pub fn process(&mut self, chunk: &[f32]) -> Vec<f32> {
        if self.triggered {
            return chunk.to_vec();
        }

        let confidence = self.detector.score(chunk);
        if confidence >= self.threshold {
            self.triggered = true;
            let mut out: Vec<f32> = self.preroll.drain(..).collect();
            out.extend_from_slice(chunk);
            return out;
        }

        for &sample in chunk {
            if self.preroll.len() >= self.preroll_capacity {
                self.preroll.pop_front();
            }
            self.preroll.push_back(sample);
        }
        Vec::new()
    }

    pub fn reset(&mut self) {
        self.triggered = false;
        self.preroll.clear();
    }
}

//! Voice activity state machine: WAITING → SPEECH → TRAILING, with
//! hysteresis around the speech threshold to prevent chattering.
//!
//! Unlike [`crate::Vad`] (which turns raw samples into a probability), this
//! module turns a *stream* of probabilities into utterance boundaries. It
//! tracks state purely in terms of chunk counts rather than wall-clock time,
//! so that durations are a deterministic function of `chunks_per_second` and
//! the number of `process()` calls — this is what makes the state machine
//! unit-testable without a clock.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech detected yet.
    Waiting,
    /// Currently inside an utterance.
    Speech,
    /// Brief silence during speech (hysteresis zone). Behaves identically to
    /// `Speech` today; kept distinct for forward-compatibility.
    Trailing,
}

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub threshold: f32,
    pub hysteresis: f32,
    pub min_speech_chunks: u32,
    pub min_speech_duration_s: f32,
    pub max_silence_duration_s: f32,
    pub chunks_per_second: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            hysteresis: 0.15,
            min_speech_chunks: 2,
            min_speech_duration_s: 0.3,
            max_silence_duration_s: 0.8,
            chunks_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    pub state: VadState,
    pub is_speech: bool,
    pub utterance_complete: bool,
    pub speech_duration_s: f32,
    pub should_buffer: bool,
}

/// Unified VAD state machine for speech detection.
pub struct VadProcessor {
    config: VadConfig,
    state: VadState,
    consecutive_speech: u32,
    consecutive_silence: u32,
    chunk_index: u64,
    speech_start_chunk: Option<u64>,
}

impl VadProcessor {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Waiting,
            consecutive_speech: 0,
            consecutive_silence: 0,
            chunk_index: 0,
            speech_start_chunk: None,
        }
    }

    pub fn reset(&mut self) {
        self.state = VadState::Waiting;
        self.consecutive_speech = 0;
        self.consecutive_silence = 0;
        self.chunk_index = 0;
        self.speech_start_chunk = None;
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, VadState::Speech | VadState::Trailing)
    }

    pub fn current_speech_duration_s(&self) -> f32 {
        self.speech_duration_at(self.chunk_index)
    }

    fn speech_duration_at(&self, chunk_index: u64) -> f32 {
        match self.speech_start_chunk {
            Some(start) => {
                (chunk_index.saturating_sub(start)) as f32 / self.config.chunks_per_second as f32
            }
            None => 0.0,
        }
    }

    /// Feed one chunk's speech probability and advance the state machine.
    pub fn process(&mut self, speech_prob: f32) -> VadResult {
        self.chunk_index += 1;
        let is_above_threshold = speech_prob > self.config.threshold;
        let is_below_hysteresis = speech_prob < (self.config.threshold - self.config.hysteresis);

        let (utterance_complete, should_buffer, final_duration) = match self.state {
            VadState::Waiting => {
                self.process_waiting(is_above_threshold);
                (false, false, None)
            }
            VadState::Speech | VadState::Trailing => {
                self.process_speech(is_above_threshold, is_below_hysteresis)
            }
        };

        // On the chunk that closes an utterance, report the duration of the
        // speech itself (up to the last chunk that was actually above
        // threshold), not the ongoing `speech_start_chunk` calculation,
        // which by this point has already been reset to `None` and which,
        // before reset, would include the trailing silence chunks spent
        // confirming the utterance had ended.
        let speech_duration_s =
            final_duration.unwrap_or_else(|| self.speech_duration_at(self.chunk_index));

        VadResult {
            state: self.state,
            is_speech: self.is_active(),
            utterance_complete,
            speech_duration_s,
            should_buffer,
        }
    }

    fn process_waiting(&mut self, is_above_threshold: bool) {
        if is_above_threshold {
            self.consecutive_speech += 1;
            if self.consecutive_speech >= self.config.min_speech_chunks {
                self.state = VadState::Speech;
                // Backdate the start to capture the attack that triggered us.
                self.speech_start_chunk = Some(
                    self.chunk_index
                        .saturating_sub(self.consecutive_speech as u64),
                );
            }
        } else {
            self.consecutive_speech = 0;
        }
    }

    /// Shared by Speech and Trailing (§4.3: TRAILING behaves identically to
    /// SPEECH today).
    fn process_speech(
        &mut self,
        is_above_threshold: bool,
        is_below_hysteresis: bool,
    ) -> (bool, bool, Option<f32>) {
        let should_buffer = true;
        let mut utterance_complete = false;
        let mut final_duration = None;

        if is_above_threshold {
            self.consecutive_speech += 1;
            self.consecutive_silence = 0;
        } else if is_below_hysteresis {
            self.consecutive_silence += 1;
            self.consecutive_speech = 0;

            let required_silence =
                (self.config.max_silence_duration_s * self.config.chunks_per_second as f32) as u32;
            if self.consecutive_silence >= required_silence {
                let (meets_minimum, duration) = self.finish_utterance();
                utterance_complete = meets_minimum;
                final_duration = Some(duration);
            }
        }
        // else: inside the hysteresis band — hold state, keep buffering.

        (utterance_complete, should_buffer, final_duration)
    }

    /// Checks whether the just-ended utterance meets the minimum duration,
    /// and resets to WAITING either way. The returned duration measures
    /// speech only, up to the last chunk that was actually above threshold
    /// — it excludes the trailing silence chunks spent confirming the
    /// utterance had ended.
    fn finish_utterance(&mut self) -> (bool, f32) {
        let last_speech_chunk = self.chunk_index.saturating_sub(self.consecutive_silence as u64);
        let duration = match self.speech_start_chunk {
            Some(start) => {
                (last_speech_chunk.saturating_sub(start)) as f32 / self.config.chunks_per_second as f32
            }
            None => 0.0,
        };
        self.state = VadState::Waiting;
        self.consecutive_speech = 0;
        self.consecutive_silence = 0;
        self.speech_start_chunk = None;
        (duration >= self.config.min_speech_duration_s, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VadConfig {
        VadConfig {
            threshold: 0.5,
            hysteresis: 0.15,
            min_speech_chunks: 2,
            min_speech_duration_s: 0.3,
            max_silence_duration_s: 0.8,
            chunks_per_second: 10,
        }
    }

    #[test]
    fn waiting_to_speech_requires_min_consecutive_chunks() {
        let mut vad = VadProcessor::new(config());
        let r1 = vad.process(0.9);
        assert_eq!(r1.state, VadState::Waiting);
        let r2 = vad.process(0.9);
        assert_eq!(r2.state, VadState::Speech);
    }

    #[test]
    fn hysteresis_band_holds_state_without_transition() {
        // threshold=0.5, hysteresis=0.15 => band is [0.35, 0.5]
        let mut vad = VadProcessor::new(config());
        vad.process(0.9);
        vad.process(0.9); // now SPEECH
        for _ in 0..50 {
            let r = vad.process(0.4); // strictly inside [0.35, 0.5]
            assert_eq!(r.state, VadState::Speech);
            assert!(!r.utterance_complete);
        }
    }

    #[test]
    fn s4_utterance_detection_scenario() {
        // 10 chunks at 0.7 (speech), then 10 chunks at 0.1 (silence).
        // chunks_per_second=10, max_silence_duration=0.8s => 8 silence chunks needed.
        let mut vad = VadProcessor::new(config());
        let mut completions = 0;
        let mut last_duration = 0.0f32;

        for _ in 0..10 {
            let r = vad.process(0.7);
            if r.utterance_complete {
                completions += 1;
            }
        }
        for _ in 0..10 {
            let r = vad.process(0.1);
            if r.utterance_complete {
                completions += 1;
                last_duration = r.speech_duration_s;
            }
        }

        assert_eq!(completions, 1);
        assert!((last_duration - 1.0).abs() < 0.15, "got {last_duration}");
    }

    #[test]
    fn short_utterance_is_discarded_silently() {
        // Only 2 speech chunks (just enough to trigger SPEECH at min_speech_chunks=2),
        // total speech duration well under min_speech_duration, followed by silence.
        let mut vad = VadProcessor::new(config());
        vad.process(0.9);
        vad.process(0.9); // SPEECH, duration so far 0.0s (backdated to now)
        let mut saw_completion = false;
        for _ in 0..8 {
            let r = vad.process(0.0);
            if r.utterance_complete {
                saw_completion = true;
            }
        }
        assert!(!saw_completion);
        assert_eq!(vad.state(), VadState::Waiting);
    }

    #[test]
    fn completing_chunk_reports_nonzero_duration_not_the_post_reset_zero() {
        // Regression: speech_duration_s must be read from the utterance that
        // just closed, not recomputed after speech_start_chunk is reset.
        let mut vad = VadProcessor::new(config());
        vad.process(0.9);
        vad.process(0.9); // SPEECH
        for _ in 0..6 {
            vad.process(0.7);
        }
        let mut completing = None;
        for _ in 0..8 {
            let r = vad.process(0.1);
            if r.utterance_complete {
                completing = Some(r);
            }
        }
        let r = completing.expect("utterance should have completed");
        assert!(r.speech_duration_s > 0.0, "got {}", r.speech_duration_s);
    }

    #[test]
    fn trailing_behaves_like_speech() {
        let mut vad = VadProcessor::new(config());
        vad.process(0.9);
        vad.process(0.9);
        vad.state = VadState::Trailing;
        let r = vad.process(0.9);
        assert_eq!(r.state, VadState::Trailing);
        assert!(r.should_buffer);
    }
}

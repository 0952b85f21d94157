use super::{StabilizationConfig, StreamingResult, StreamingStrategy};
use crate::audio::AudioBuffer;
use crate::backend::Backend;
use crate::hypothesis::HypothesisBuffer;
use async_trait::async_trait;
use shared_protocol::TARGET_SAMPLE_RATE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Primary strategy: batch-reinvoke the backend on the growing buffer,
/// stabilize its output with LocalAgreement-N, and trim the audio buffer up
/// to the last confirmed word once it has been surfaced.
pub struct LocalAgreementStrategy {
    backend: Arc<dyn Backend>,
    audio_buffer: AudioBuffer,
    hypothesis: HypothesisBuffer,
    config: StabilizationConfig,
    language: Option<String>,
    audio_since_last_pass: f64,
    last_result: StreamingResult,
    backend_timeout: Duration,
}

impl LocalAgreementStrategy {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: StabilizationConfig,
        max_buffer_seconds: f64,
        max_confirmed_words: usize,
        language: Option<String>,
    ) -> Self {
        Self::with_timeout(
            backend,
            config,
            max_buffer_seconds,
            max_confirmed_words,
            language,
            Duration::from_secs_f64(30.0),
        )
    }

    /// `backend_timeout` bounds a single `backend.transcribe` call
    /// (`transcription.timeout_seconds`). A call that exceeds it is
    /// abandoned and the strategy falls back to its previous result, the
    /// same recovery path taken for an outright backend error.
    pub fn with_timeout(
        backend: Arc<dyn Backend>,
        config: StabilizationConfig,
        max_buffer_seconds: f64,
        max_confirmed_words: usize,
        language: Option<String>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            audio_buffer: AudioBuffer::new(TARGET_SAMPLE_RATE, max_buffer_seconds),
            hypothesis: HypothesisBuffer::new(config.local_agreement_n.max(1), max_confirmed_words),
            config,
            language,
            audio_since_last_pass: 0.0,
            last_result: StreamingResult {
                confirmed_text: String::new(),
                tentative_text: String::new(),
                is_final: false,
                audio_duration_seconds: 0.0,
            },
            backend_timeout,
        }
    }

    fn current_result(&self, is_final: bool) -> StreamingResult {
        StreamingResult {
            confirmed_text: self.hypothesis.get_confirmed_text(),
            tentative_text: self.hypothesis.get_tentative_text(),
            is_final,
            audio_duration_seconds: self.audio_buffer.total_duration_seconds(),
        }
    }

    async fn run_pass(&mut self, is_final: bool) -> StreamingResult {
        let (samples, offset_seconds) = self.audio_buffer.get_audio();
        if samples.is_empty() {
            return self.current_result(is_final);
        }

        let wav_bytes = match encode_wav(&samples, TARGET_SAMPLE_RATE) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode audio buffer as wav");
                return self.last_result.clone();
            }
        };

        let prompt = self.hypothesis.get_prompt_suffix(self.config.prompt_suffix_chars);

        let call = self.backend.transcribe(&wav_bytes, &prompt, self.language.as_deref());
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(Ok(transcript)) => {
                self.hypothesis.insert(&transcript.words, offset_seconds);
                self.hypothesis.flush();

                if let Some(last) = self.hypothesis.confirmed().last() {
                    self.audio_buffer.trim_to_time(last.end);
                }

                self.audio_since_last_pass = 0.0;
                let result = self.current_result(is_final);
                self.last_result = result.clone();
                result
            }
            Ok(Err(e)) => {
                warn!(error = %e, "backend transcription pass failed, reusing previous result");
                self.last_result.is_final = is_final;
                self.last_result.clone()
            }
            Err(_elapsed) => {
                warn!(
                    timeout_s = self.backend_timeout.as_secs_f64(),
                    "backend transcription pass timed out, reusing previous result"
                );
                self.last_result.is_final = is_final;
                self.last_result.clone()
            }
        }
    }
}

#[async_trait]
impl StreamingStrategy for LocalAgreementStrategy {
    async fn process_audio(&mut self, chunk: &[f32]) -> StreamingResult {
        self.audio_buffer.append(chunk);
        self.audio_since_last_pass += chunk.len() as f64 / TARGET_SAMPLE_RATE as f64;

        if self.audio_since_last_pass >= self.config.transcribe_interval_seconds {
            self.run_pass(false).await
        } else {
            debug!(
                since_last_pass = self.audio_since_last_pass,
                interval = self.config.transcribe_interval_seconds,
                "skipping transcription pass, not enough new audio yet"
            );
            self.current_result(false)
        }
    }

    async fn finalize(&mut self) -> StreamingResult {
        let mut result = self.run_pass(true).await;
        // Commit whatever is still tentative: the final pass's leftover
        // hypothesis is promoted wholesale since no further agreement round
        // will ever arrive to confirm it.
        if !self.hypothesis.current_hypothesis().is_empty() {
            let tentative_text = self.hypothesis.get_tentative_text();
            result.confirmed_text = if result.confirmed_text.is_empty() {
                tentative_text
            } else {
                format!("{} {}", result.confirmed_text, tentative_text)
            };
            result.tentative_text.clear();
        }
        result.is_final = true;
        result
    }

    async fn cleanup(&mut self) {}
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            let clamped = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(clamped)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;

    async fn new_strategy() -> LocalAgreementStrategy {
        let backend = Arc::new(StubBackend::new());
        backend.load().await.unwrap();
        LocalAgreementStrategy::new(backend, StabilizationConfig::low(), 30.0, 500, None)
    }

    #[tokio::test]
    async fn process_audio_below_interval_skips_backend_call() {
        let mut strategy = new_strategy().await;
        let chunk = vec![0.0f32; 1000]; // well under 1.0s interval
        let result = strategy.process_audio(&chunk).await;
        assert!(!result.is_final);
        assert_eq!(result.confirmed_text, "");
    }

    #[tokio::test]
    async fn finalize_always_marks_final() {
        let mut strategy = new_strategy().await;
        strategy.process_audio(&vec![0.0f32; 16000]).await;
        let result = strategy.finalize().await;
        assert!(result.is_final);
    }

    #[tokio::test]
    async fn process_audio_at_interval_triggers_pass() {
        let mut strategy = new_strategy().await;
        let one_second = vec![0.0f32; TARGET_SAMPLE_RATE as usize];
        let result = strategy.process_audio(&one_second).await;
        assert!((result.audio_duration_seconds - 1.0).abs() < 1e-6);
    }

    struct SlowBackend;

    #[async_trait]
    impl crate::backend::Backend for SlowBackend {
        async fn load(&self) -> Result<(), crate::error::BackendError> {
            Ok(())
        }
        fn is_ready(&self) -> bool {
            true
        }
        async fn transcribe(
            &self,
            _wav_bytes: &[u8],
            _prompt_text: &str,
            _language: Option<&str>,
        ) -> Result<crate::backend::BackendTranscript, crate::error::BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout should fire before this resolves")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backend_call_exceeding_timeout_falls_back_to_previous_result() {
        let mut strategy = LocalAgreementStrategy::with_timeout(
            Arc::new(SlowBackend),
            StabilizationConfig::low(),
            30.0,
            500,
            None,
            Duration::from_millis(50),
        );
        let one_second = vec![0.0f32; TARGET_SAMPLE_RATE as usize];
        let result = strategy.process_audio(&one_second).await;
        assert_eq!(result.confirmed_text, "");
        assert_eq!(result.tentative_text, "");
        assert!(!result.is_final);
    }
}

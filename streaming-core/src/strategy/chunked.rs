use super::{StreamingResult, StreamingStrategy};
use crate::audio::AudioBuffer;
use crate::backend::Backend;
use async_trait::async_trait;
use shared_protocol::TARGET_SAMPLE_RATE;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Fallback strategy for backends that cannot preserve context across
/// calls: re-transcribes the full buffer every pass and surfaces the whole
/// result as tentative. Per the pinned design decision, `confirmed_text`
/// stays empty until `finalize()` to preserve prefix-monotonicity.
pub struct ChunkedStrategy {
    backend: Arc<dyn Backend>,
    audio_buffer: AudioBuffer,
    transcribe_interval_seconds: f64,
    language: Option<String>,
    audio_since_last_pass: f64,
    last_tentative_text: String,
    backend_timeout: Duration,
}

impl ChunkedStrategy {
    pub fn new(
        backend: Arc<dyn Backend>,
        transcribe_interval_seconds: f64,
        max_buffer_seconds: f64,
        language: Option<String>,
    ) -> Self {
        Self::with_timeout(
            backend,
            transcribe_interval_seconds,
            max_buffer_seconds,
            language,
            Duration::from_secs_f64(30.0),
        )
    }

    pub fn with_timeout(
        backend: Arc<dyn Backend>,
        transcribe_interval_seconds: f64,
        max_buffer_seconds: f64,
        language: Option<String>,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            audio_buffer: AudioBuffer::new(TARGET_SAMPLE_RATE, max_buffer_seconds),
            transcribe_interval_seconds,
            language,
            audio_since_last_pass: 0.0,
            last_tentative_text: String::new(),
            backend_timeout,
        }
    }

    async fn run_pass(&mut self) {
        let (samples, _offset) = self.audio_buffer.get_audio();
        if samples.is_empty() {
            return;
        }

        let wav_bytes = match encode_wav(&samples, TARGET_SAMPLE_RATE) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode audio buffer as wav");
                return;
            }
        };

        let call = self.backend.transcribe(&wav_bytes, "", self.language.as_deref());
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(Ok(transcript)) => {
                self.last_tentative_text = transcript.text;
                self.audio_since_last_pass = 0.0;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "backend transcription pass failed, keeping previous tentative text");
            }
            Err(_elapsed) => {
                warn!(
                    timeout_s = self.backend_timeout.as_secs_f64(),
                    "backend transcription pass timed out, keeping previous tentative text"
                );
            }
        }
    }
}

#[async_trait]
impl StreamingStrategy for ChunkedStrategy {
    async fn process_audio(&mut self, chunk: &[f32]) -> StreamingResult {
        self.audio_buffer.append(chunk);
        self.audio_since_last_pass += chunk.len() as f64 / TARGET_SAMPLE_RATE as f64;

        if self.audio_since_last_pass >= self.transcribe_interval_seconds {
            self.run_pass().await;
        }

        StreamingResult {
            confirmed_text: String::new(),
            tentative_text: self.last_tentative_text.clone(),
            is_final: false,
            audio_duration_seconds: self.audio_buffer.total_duration_seconds(),
        }
    }

    async fn finalize(&mut self) -> StreamingResult {
        self.run_pass().await;
        StreamingResult {
            confirmed_text: self.last_tentative_text.clone(),
            tentative_text: String::new(),
            is_final: true,
            audio_duration_seconds: self.audio_buffer.total_duration_seconds(),
        }
    }
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

    #[tokio::test]
    async fn confirmed_stays_empty_until_finalize() {
        let backend = Arc::new(StubBackend::new());
        backend.load().await.unwrap();
        let mut strategy = ChunkedStrategy::new(backend, 1.0, 30.0, None);

        let result = strategy.process_audio(&vec![0.0f32; TARGET_SAMPLE_RATE as usize]).await;
        assert_eq!(result.confirmed_text, "");

        let final_result = strategy.finalize().await;
        assert!(final_result.is_final);
        assert!(final_result.tentative_text.is_empty());
    }
}

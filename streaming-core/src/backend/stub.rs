use super::{Backend, BackendTranscript};
use crate::error::BackendError;
use crate::hypothesis::TimestampedWord;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// A deterministic, model-free backend used when no real ASR engine is
/// configured (the default build, without the `whisper-backend` feature).
/// Produces a synthetic transcript derived from the clip's duration, so
/// callers exercising the streaming pipeline see plausible, reproducible
/// output without a multi-gigabyte model download.
pub struct StubBackend {
    ready: AtomicBool,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn load(&self) -> Result<(), BackendError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn transcribe(
        &self,
        wav_bytes: &[u8],
        prompt_text: &str,
        _language: Option<&str>,
    ) -> Result<BackendTranscript, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::NotReady);
        }

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav_bytes))
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        let spec = reader.spec();
        let sample_count = reader.len() as f64;
        let duration_s = if spec.sample_rate == 0 {
            0.0
        } else {
            sample_count / spec.sample_rate as f64
        };

        let word_count = (duration_s / 0.3).round().max(0.0) as usize;
        let mut words = Vec::with_capacity(word_count);
        for i in 0..word_count {
            let start = i as f64 * 0.3;
            let end = (start + 0.3).min(duration_s);
            words.push(TimestampedWord::new(format!("word{i}"), start, end, 0.99));
        }

        let mut text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if !prompt_text.is_empty() {
            // Continuity with prior context is cosmetic here; a real backend
            // would condition generation on it instead of prefixing it.
            text = text.trim().to_string();
        }

        Ok(BackendTranscript { text, words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(duration_s: f64) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let n = (duration_s * 16000.0) as usize;
            for _ in 0..n {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn not_ready_before_load() {
        let backend = StubBackend::new();
        let err = backend.transcribe(&wav_bytes(1.0), "", None).await.unwrap_err();
        assert!(matches!(err, BackendError::NotReady));
    }

    #[tokio::test]
    async fn produces_words_proportional_to_duration() {
        let backend = StubBackend::new();
        backend.load().await.unwrap();
        let result = backend.transcribe(&wav_bytes(3.0), "", None).await.unwrap();
        assert_eq!(result.words.len(), 10);
        assert!(!result.text.is_empty());
    }

    #[tokio::test]
    async fn zero_duration_clip_yields_no_words() {
        let backend = StubBackend::new();
        backend.load().await.unwrap();
        let result = backend.transcribe(&wav_bytes(0.0), "", None).await.unwrap();
        assert!(result.words.is_empty());
        assert_eq!(result.text, "");
    }
}

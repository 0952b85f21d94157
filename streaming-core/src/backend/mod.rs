//! Pluggable ASR backend facade (C9).

mod stub;

#[cfg(feature = "whisper-backend")]
mod whisper;

pub use stub::StubBackend;

#[cfg(feature = "whisper-backend")]
pub use whisper::WhisperBackend;

use crate::error::BackendError;
use crate::hypothesis::TimestampedWord;
use async_trait::async_trait;

/// Output of a single backend transcription call.
pub struct BackendTranscript {
    pub text: String,
    pub words: Vec<TimestampedWord>,
}

/// A speech-to-text engine. Implementations may be expensive to load and
/// are expected to be shared across sessions behind a concurrency limiter
/// (see the dispatcher's backend semaphore).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Load model weights / warm up. Called once at startup; `transcribe`
    /// must not be called before this returns `Ok`.
    async fn load(&self) -> Result<(), BackendError>;

    fn is_ready(&self) -> bool;

    /// Transcribe one WAV-encoded clip, conditioned on `prompt_text` (a
    /// suffix of already-confirmed text, used to bias decoding continuity)
    /// and `language` (an ISO 639-1 code, or `None` for auto-detect).
    async fn transcribe(
        &self,
        wav_bytes: &[u8],
        prompt_text: &str,
        language: Option<&str>,
    ) -> Result<BackendTranscript, BackendError>;
}

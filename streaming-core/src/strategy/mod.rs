//! Streaming strategies fronting the backend (C5).

mod chunked;
mod local_agreement;
mod native;

pub use chunked::ChunkedStrategy;
pub use local_agreement::LocalAgreementStrategy;
pub use native::{NativeBackend, NativeStrategy};

use async_trait::async_trait;

/// Result of one ingest or finalize call, handed back to the session for
/// translation into an outbound wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingResult {
    pub confirmed_text: String,
    pub tentative_text: String,
    pub is_final: bool,
    pub audio_duration_seconds: f64,
}

/// Tunables for the local-agreement strategy. The three fields below are
/// the ones a `streaming.stabilization` preset overwrites.
#[derive(Debug, Clone)]
pub struct StabilizationConfig {
    pub local_agreement_n: usize,
    pub transcribe_interval_seconds: f64,
    pub prompt_suffix_chars: usize,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            local_agreement_n: 2,
            transcribe_interval_seconds: 2.0,
            prompt_suffix_chars: 200,
        }
    }
}

impl StabilizationConfig {
    pub fn low() -> Self {
        Self {
            local_agreement_n: 1,
            transcribe_interval_seconds: 1.0,
            prompt_suffix_chars: 120,
        }
    }

    pub fn medium() -> Self {
        Self::default()
    }

    pub fn high() -> Self {
        Self {
            local_agreement_n: 3,
            transcribe_interval_seconds: 3.0,
            prompt_suffix_chars: 300,
        }
    }

    pub fn from_preset_name(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::low()),
            "medium" => Some(Self::medium()),
            "high" => Some(Self::high()),
            _ => None,
        }
    }
}

/// A pluggable way of turning a growing stream of audio chunks into
/// confirmed/tentative text. One instance is owned by exactly one Session.
#[async_trait]
pub trait StreamingStrategy: Send {
    async fn process_audio(&mut self, chunk: &[f32]) -> StreamingResult;

    async fn finalize(&mut self) -> StreamingResult;

    /// Release any backend-side resources attributable to this session.
    /// Most strategies have nothing to do here; present for symmetry with
    /// backends that hold per-session state (e.g. a native streaming socket).
    async fn cleanup(&mut self) {}
}

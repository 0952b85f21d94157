use super::{StreamingResult, StreamingStrategy};
use crate::error::BackendError;
use async_trait::async_trait;

/// A backend exposing its own native streaming API rather than
/// batch-reinvocation. The adapter below fronts it with the same
/// `StreamingStrategy` interface the other two variants implement.
#[async_trait]
pub trait NativeBackend: Send + Sync {
    async fn feed_audio(&mut self, chunk: &[f32]) -> Result<(String, String), BackendError>;
    async fn finish(&mut self) -> Result<String, BackendError>;
}

pub struct NativeStrategy<B: NativeBackend> {
    backend: B,
    total_duration_seconds: f64,
    last_confirmed: String,
    last_tentative: String,
}

impl<B: NativeBackend> NativeStrategy<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            total_duration_seconds: 0.0,
            last_confirmed: String::new(),
            last_tentative: String::new(),
        }
    }
}

#[async_trait]
impl<B: NativeBackend + Send> StreamingStrategy for NativeStrategy<B> {
    async fn process_audio(&mut self, chunk: &[f32]) -> StreamingResult {
        self.total_duration_seconds += chunk.len() as f64 / shared_protocol::TARGET_SAMPLE_RATE as f64;

        match self.backend.feed_audio(chunk).await {
            Ok((confirmed, tentative)) => {
                self.last_confirmed = confirmed;
                self.last_tentative = tentative;
            }
            Err(e) => {
                tracing::warn!(error = %e, "native backend feed_audio failed, reusing previous result");
            }
        }

        StreamingResult {
            confirmed_text: self.last_confirmed.clone(),
            tentative_text: self.last_tentative.clone(),
            is_final: false,
            audio_duration_seconds: self.total_duration_seconds,
        }
    }

    async fn finalize(&mut self) -> StreamingResult {
        let confirmed = match self.backend.finish().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "native backend finish failed, falling back to last confirmed text");
                self.last_confirmed.clone()
            }
        };

        StreamingResult {
            confirmed_text: confirmed,
            tentative_text: String::new(),
            is_final: true,
            audio_duration_seconds: self.total_duration_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoBackend {
        words_fed: usize,
    }

    #[async_trait]
    impl NativeBackend for EchoBackend {
        async fn feed_audio(&mut self, _chunk: &[f32]) -> Result<(String, String), BackendError> {
            self.words_fed += 1;
            Ok((String::new(), format!("chunk{}", self.words_fed)))
        }

        async fn finish(&mut self) -> Result<String, BackendError> {
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn adapter_surfaces_backend_confirmed_and_tentative() {
        let mut strategy = NativeStrategy::new(EchoBackend { words_fed: 0 });
        let result = strategy.process_audio(&vec![0.0f32; 1600]).await;
        assert_eq!(result.tentative_text, "chunk1");

        let final_result = strategy.finalize().await;
        assert_eq!(final_result.confirmed_text, "done");
        assert!(final_result.is_final);
    }
}

use super::{Backend, BackendTranscript};
use crate::error::BackendError;
use crate::hypothesis::TimestampedWord;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

const MAX_PROMPT_CHARS: usize = 224 * 4; // rough token-to-char ratio

/// Real ASR backend wrapping `whisper-rs`. One `WhisperState` is reused
/// across calls for performance; access is serialized by an internal mutex
/// since `whisper_rs::WhisperState::full` takes `&mut self`.
pub struct WhisperBackend {
    ctx: WhisperContext,
    state: Mutex<Option<WhisperState>>,
    ready: AtomicBool,
}

impl WhisperBackend {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let ctx = WhisperContext::new_with_params(
            &model_path.as_ref().to_string_lossy(),
            WhisperContextParameters::default(),
        )
        .map_err(|e| BackendError::Failed(e.to_string()))?;
        Ok(Self {
            ctx,
            state: Mutex::new(None),
            ready: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Backend for WhisperBackend {
    async fn load(&self) -> Result<(), BackendError> {
        let state = self
            .ctx
            .create_state()
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        *self.state.lock().await = Some(state);
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
        language: Option<&str>,
    ) -> Result<BackendTranscript, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::NotReady);
        }

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav_bytes))
            .map_err(|e| BackendError::Failed(e.to_string()))?;
        let samples: Vec<f32> = reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        let mut state_guard = self.state.lock().await;
        let state = state_guard.as_mut().ok_or(BackendError::NotReady)?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        params.set_suppress_nst(true);
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_token_timestamps(true);
        params.set_no_context(true);

        let truncated_prompt = if prompt_text.len() > MAX_PROMPT_CHARS {
            let tail_start = crate::text::floor_char_boundary(
                prompt_text,
                prompt_text.len() - MAX_PROMPT_CHARS,
            );
            &prompt_text[tail_start..]
        } else {
            prompt_text
        };
        if !truncated_prompt.is_empty() {
            params.set_initial_prompt(truncated_prompt);
        }

        // `WhisperState::full` is a long-running, CPU-bound, synchronous
        // call; running it inline would stall this task's executor thread
        // for the whole decode. `block_in_place` hands the thread off to
        // the runtime for the duration so other connections keep making
        // progress, without requiring `state`/`samples` to be `'static` the
        // way `spawn_blocking` would.
        tokio::task::block_in_place(|| state.full(params, &samples))
            .map_err(|e| BackendError::Failed(e.to_string()))?;

        let n_segments = state.full_n_segments();
        let eot_id = self.ctx.token_eot();
        let mut words = Vec::new();

        for i in 0..n_segments {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let n_tokens = segment.n_tokens();
            for j in 0..n_tokens {
                let Some(token) = segment.get_token(j) else {
                    continue;
                };
                if token.token_id() >= eot_id {
                    continue;
                }
                let Ok(text) = token.to_str_lossy() else {
                    continue;
                };
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let data = token.token_data();
                words.push(TimestampedWord::new(
                    trimmed,
                    data.t0 as f64 / 100.0,
                    data.t1 as f64 / 100.0,
                    token.token_probability(),
                ));
            }
        }

        info!(segments = n_segments, words = words.len(), "whisper transcription complete");

        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(BackendTranscript { text, words })
    }
}

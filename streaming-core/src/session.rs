//! Per-connection session wrapper (C6).

use crate::audio::{normalize_pcm, OpusSessionDecoder};
use crate::error::SessionError;
use crate::strategy::{StreamingResult, StreamingStrategy};
use crate::wake_word::{WakeWordDetector, WakeWordGate};
use shared_vad::{Vad, VadConfig, VadProcessor};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Ending,
    Closed,
}

#[derive(Debug, Default)]
pub struct ChunkCounts {
    pub received: AtomicU64,
    pub decoded: AtomicU64,
}

/// Holds everything one connection's stream needs: codec state, the
/// streaming strategy, and (optionally) a wake-word gate. Exclusively owned
/// by the registry; the dispatcher only ever touches it through a lookup.
pub struct Session {
    pub id: String,
    state: Mutex<SessionState>,
    sample_rate: u32,
    opus_decoder: Mutex<Option<OpusSessionDecoder>>,
    strategy: Mutex<Box<dyn StreamingStrategy>>,
    wake_word: Mutex<Option<Box<dyn GatedWakeWord>>>,
    vad: Mutex<(Vad, VadProcessor)>,
    last_result: Mutex<StreamingResult>,
    last_activity: Mutex<std::time::Instant>,
    pub chunk_counts: ChunkCounts,
}

/// Object-safe wrapper so `Session` need not be generic over the detector
/// type the embedding application chooses.
trait GatedWakeWord: Send {
    fn process(&mut self, chunk: &[f32]) -> Vec<f32>;
}

impl<D: WakeWordDetector> GatedWakeWord for WakeWordGate<D> {
    fn process(&mut self, chunk: &[f32]) -> Vec<f32> {
        WakeWordGate::process(self, chunk)
    }
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        sample_rate: u32,
        strategy: Box<dyn StreamingStrategy>,
        wake_word: Option<Box<dyn GatedWakeWordInit>>,
    ) -> Result<Self, SessionError> {
        Self::with_vad_config(id, sample_rate, strategy, wake_word, VadConfig::default())
    }

    pub fn with_vad_config(
        id: impl Into<String>,
        sample_rate: u32,
        strategy: Box<dyn StreamingStrategy>,
        wake_word: Option<Box<dyn GatedWakeWordInit>>,
        vad_config: VadConfig,
    ) -> Result<Self, SessionError> {
        let opus_decoder = OpusSessionDecoder::new().ok();
        Ok(Self {
            id: id.into(),
            state: Mutex::new(SessionState::Active),
            sample_rate,
            opus_decoder: Mutex::new(opus_decoder),
            strategy: Mutex::new(strategy),
            wake_word: Mutex::new(wake_word.map(|w| w.into_gate())),
            vad: Mutex::new((Vad::new(), VadProcessor::new(vad_config))),
            last_result: Mutex::new(StreamingResult {
                confirmed_text: String::new(),
                tentative_text: String::new(),
                is_final: false,
                audio_duration_seconds: 0.0,
            }),
            last_activity: Mutex::new(std::time::Instant::now()),
            chunk_counts: ChunkCounts::default(),
        })
    }

    /// Seconds since the last `feed_pcm`/`feed_opus` call, for the
    /// registry's idle-session reaper (`session_timeout_seconds`).
    pub async fn idle_seconds(&self) -> f64 {
        self.last_activity.lock().await.elapsed().as_secs_f64()
    }

    async fn touch(&self) {
        *self.last_activity.lock().await = std::time::Instant::now();
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    async fn ensure_active(&self) -> Result<(), SessionError> {
        match *self.state.lock().await {
            SessionState::Active => Ok(()),
            SessionState::Ending | SessionState::Closed => Err(SessionError::Closed),
        }
    }

    async fn gate_and_forward(&self, pcm: Vec<f32>) -> Option<Vec<f32>> {
        let mut gate_guard = self.wake_word.lock().await;
        match gate_guard.as_mut() {
            Some(gate) => {
                let forwarded = gate.process(&pcm);
                if forwarded.is_empty() {
                    None
                } else {
                    Some(forwarded)
                }
            }
            None => Some(pcm),
        }
    }

    /// Feed a raw PCM chunk (already decoded, source-rate samples).
    ///
    /// Pipeline: normalize to 16kHz mono float -> optional wake-word gate ->
    /// VAD gate -> strategy.process_audio. A chunk gated out at either stage
    /// does not reach the backend; callers still get a `StreamingResult`, the
    /// most recently produced one, so silence doesn't regress the client's
    /// view of `confirmed_text`/`tentative_text`.
    pub async fn feed_pcm(
        &self,
        samples: &[i16],
        source_rate: u32,
        channels: u16,
    ) -> Result<StreamingResult, SessionError> {
        self.ensure_active().await?;
        self.touch().await;
        self.chunk_counts.received.fetch_add(1, Ordering::Relaxed);

        let normalized = normalize_pcm(samples, source_rate, channels)?;
        self.chunk_counts.decoded.fetch_add(1, Ordering::Relaxed);

        let Some(forwarded) = self.gate_and_forward(normalized).await else {
            return Ok(self.last_result.lock().await.clone());
        };

        if !self.vad_should_buffer(&forwarded).await {
            return Ok(self.last_result.lock().await.clone());
        }

        let mut strategy = self.strategy.lock().await;
        let result = strategy.process_audio(&forwarded).await;
        drop(strategy);
        *self.last_result.lock().await = result.clone();
        Ok(result)
    }

    /// Score `chunk` for speech and advance the per-session VAD state
    /// machine. Returns whether the chunk falls inside an utterance and
    /// should therefore be forwarded on to the strategy.
    async fn vad_should_buffer(&self, chunk: &[f32]) -> bool {
        let mut guard = self.vad.lock().await;
        let (probability_source, processor) = &mut *guard;

        let pcm16: Vec<i16> = chunk
            .iter()
            .map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
            .collect();
        probability_source.consume(&pcm16);
        let probability = probability_source.end_p();

        let result = processor.process(probability);
        if result.utterance_complete {
            tracing::debug!(speech_duration_s = result.speech_duration_s, "utterance complete");
        }
        result.should_buffer
    }

    /// Feed one Opus packet. Decodes then delegates to `feed_pcm`, which
    /// owns chunk counting/activity-touch so a single chunk is counted once
    /// regardless of which ingress path it arrived on.
    pub async fn feed_opus(&self, packet: &[u8]) -> Result<StreamingResult, SessionError> {
        self.ensure_active().await?;

        let mut decoder_guard = self.opus_decoder.lock().await;
        let decoder = decoder_guard.as_mut().ok_or(SessionError::Internal(
            "opus decoder unavailable".to_string(),
        ))?;
        let pcm = decoder.decode(packet)?;
        drop(decoder_guard);

        self.feed_pcm(&pcm, self.sample_rate, 1).await
    }

    /// Idempotent: a second call after ENDING/CLOSED is a no-op that
    /// returns the final result produced by the first call, rather than an
    /// error — `finalize()` itself only ever runs once.
    pub async fn end(&self) -> Result<StreamingResult, SessionError> {
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Active {
                return Ok(self.last_result.lock().await.clone());
            }
            *state = SessionState::Ending;
        }

        let result = {
            let mut strategy = self.strategy.lock().await;
            strategy.finalize().await
        };
        *self.last_result.lock().await = result.clone();

        *self.state.lock().await = SessionState::Closed;
        Ok(result)
    }

    /// Like `end` but discards the result; no final message should be
    /// emitted by the caller.
    pub async fn abort(&self) {
        let mut state = self.state.lock().await;
        if *state == SessionState::Closed {
            return;
        }
        *state = SessionState::Ending;
        drop(state);

        let mut strategy = self.strategy.lock().await;
        strategy.cleanup().await;
        drop(strategy);

        *self.state.lock().await = SessionState::Closed;
    }
}

/// Lets callers hand the session a concrete detector type while keeping
/// `Session` itself non-generic.
pub trait GatedWakeWordInit: Send {
    fn into_gate(self: Box<Self>) -> Box<dyn GatedWakeWord>;
}

impl<D: WakeWordDetector + 'static> GatedWakeWordInit for WakeWordGate<D> {
    fn into_gate(self: Box<Self>) -> Box<dyn GatedWakeWord> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::strategy::{LocalAgreementStrategy, StabilizationConfig};
    use std::sync::Arc;

    async fn new_session() -> Session {
        let backend = Arc::new(StubBackend::new());
        backend.load().await.unwrap();
        let strategy = Box::new(LocalAgreementStrategy::new(
            backend,
            StabilizationConfig::low(),
            30.0,
            500,
            None,
        ));
        Session::new("s-1", 16000, strategy, None).unwrap()
    }

    #[tokio::test]
    async fn feed_after_end_is_rejected() {
        let session = new_session().await;
        session.end().await.unwrap();
        let err = session.feed_pcm(&[0i16; 1600], 16000, 1).await.unwrap_err();
        assert!(matches!(err, SessionError::Closed));
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let session = new_session().await;
        let first = session.end().await.unwrap();
        let second = session.end().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn abort_after_end_is_a_no_op() {
        let session = new_session().await;
        session.end().await.unwrap();
        session.abort().await; // must not panic
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn feed_pcm_updates_chunk_counts() {
        let session = new_session().await;
        session.feed_pcm(&[0i16; 1600], 16000, 1).await.unwrap();
        assert_eq!(session.chunk_counts.received.load(Ordering::Relaxed), 1);
        assert_eq!(session.chunk_counts.decoded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn silence_is_gated_by_vad_and_never_reaches_the_strategy() {
        let session = new_session().await;
        // Well above one transcribe_interval_seconds' worth of audio, but
        // pure silence: the VAD should never leave WAITING, so the strategy
        // never runs a transcription pass and confirmed/tentative stay empty.
        for _ in 0..20 {
            let result = session.feed_pcm(&[0i16; 1600], 16000, 1).await.unwrap();
            assert_eq!(result.confirmed_text, "");
            assert_eq!(result.tentative_text, "");
        }
    }
}

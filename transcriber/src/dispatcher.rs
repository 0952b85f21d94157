//! Message routing: parses inbound wire messages and calls the
//! corresponding session operation (C8).

use crate::config::{Settings, StrategyKind};
use shared_protocol::{ClientMessage, ErrorCode, ServerMessage, TARGET_SAMPLE_RATE};
use std::sync::Arc;
use streaming_core::strategy::{ChunkedStrategy, LocalAgreementStrategy, StreamingStrategy};
use streaming_core::{backend::Backend, RegistryError, Session, SessionError, SessionRegistry};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub struct AppState {
    pub registry: SessionRegistry,
    pub backend: Arc<dyn Backend>,
    pub backend_name: String,
    pub backend_semaphore: Arc<Semaphore>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, backend_name: String, settings: Settings) -> Self {
        let backend_semaphore = Arc::new(Semaphore::new(settings.backend_concurrency.max(1)));
        Self {
            registry: SessionRegistry::new(),
            backend,
            backend_name,
            backend_semaphore,
            settings,
        }
    }

    fn build_strategy(&self) -> Box<dyn StreamingStrategy> {
        let streaming = &self.settings.streaming;
        let backend_timeout =
            std::time::Duration::from_secs_f64(self.settings.transcription.timeout_seconds);
        match streaming.strategy {
            StrategyKind::LocalAgreement => Box::new(LocalAgreementStrategy::with_timeout(
                self.backend.clone(),
                streaming.stabilization_config(),
                streaming.max_buffer_seconds,
                streaming.max_confirmed_words,
                None,
                backend_timeout,
            )),
            StrategyKind::Chunked => Box::new(ChunkedStrategy::with_timeout(
                self.backend.clone(),
                streaming.transcribe_interval_seconds,
                streaming.max_buffer_seconds,
                None,
                backend_timeout,
            )),
            StrategyKind::Native => {
                // No concrete NativeBackend ships with this core (the native
                // streaming API is an external collaborator); fall back to
                // local-agreement rather than fail session creation.
                warn!("native strategy requested but no native backend is configured, falling back to local_agreement");
                Box::new(LocalAgreementStrategy::with_timeout(
                    self.backend.clone(),
                    streaming.stabilization_config(),
                    streaming.max_buffer_seconds,
                    streaming.max_confirmed_words,
                    None,
                    backend_timeout,
                ))
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        match self.settings.streaming.strategy {
            StrategyKind::LocalAgreement => "local_agreement",
            StrategyKind::Chunked => "chunked",
            StrategyKind::Native => "local_agreement",
        }
    }
}

fn error_message(session_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        session_id,
        code,
        message: message.into(),
    }
}

/// Handle one parsed client message. `client_id` identifies the owning
/// connection (for registry ownership / disconnect cleanup); `binary_session`
/// tracks which session this connection's raw binary frames should be
/// routed to (set on `start_stream` when `binary: true`).
pub async fn dispatch(
    state: &AppState,
    client_id: &str,
    msg: ClientMessage,
    binary_session: &mut Option<String>,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::StartStream {
            session_id,
            sample_rate,
            channels: _,
            binary,
            wake_word_enabled,
        } => {
            if let Err(e) = streaming_core::audio::validate_sample_rate(sample_rate) {
                return vec![error_message(Some(session_id), e.code(), e.to_string())];
            }

            let wake_word_enabled = wake_word_enabled.unwrap_or(false);
            if wake_word_enabled {
                warn!(session_id = %session_id, "wake_word_enabled requested but no detector is wired into this build");
            }

            let strategy = state.build_strategy();
            let vad_config = state.settings.vad.to_vad_config();
            let session = match Session::with_vad_config(
                session_id.clone(),
                TARGET_SAMPLE_RATE,
                strategy,
                None,
                vad_config,
            ) {
                Ok(s) => s,
                Err(e) => return vec![error_message(Some(session_id), e.code(), e.to_string())],
            };

            match state.registry.register(client_id, session).await {
                Ok(_) => {
                    if binary {
                        *binary_session = Some(session_id.clone());
                    }
                    info!(session_id = %session_id, sample_rate, "session started");
                    vec![ServerMessage::StreamStarted {
                        session_id,
                        strategy: state.strategy_name().to_string(),
                        backend: state.backend_name.clone(),
                        streaming_enabled: true,
                        wake_word_enabled,
                    }]
                }
                Err(e) => vec![error_message(Some(session_id), e.code(), e.to_string())],
            }
        }

        ClientMessage::PcmChunk {
            session_id,
            audio_data,
            sample_rate,
            channels,
        } => {
            let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &audio_data) else {
                return vec![error_message(
                    Some(session_id),
                    ErrorCode::DecodeError,
                    "invalid base64 pcm payload",
                )];
            };
            let samples: Vec<i16> = bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            feed_chunk(state, &session_id, &samples, sample_rate, channels).await
        }

        ClientMessage::AudioChunk { session_id, audio_data } => {
            let Ok(packet) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &audio_data) else {
                return vec![error_message(
                    Some(session_id),
                    ErrorCode::DecodeError,
                    "invalid base64 opus payload",
                )];
            };
            feed_opus_chunk(state, &session_id, &packet).await
        }

        ClientMessage::EndStream { session_id, .. } => finish_session(state, &session_id).await,

        ClientMessage::AbortStream { session_id } => {
            if let Some(session) = state.registry.remove(&session_id).await {
                session.abort().await;
                info!(session_id = %session_id, "session aborted");
            }
            Vec::new()
        }

        ClientMessage::Ping => {
            let timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            vec![ServerMessage::Pong { timestamp }]
        }
    }
}

/// Handle a raw binary frame, routed by the connection's active
/// `binary_session` (set by a prior `start_stream { binary: true }`).
pub async fn dispatch_binary(state: &AppState, binary_session: &Option<String>, data: &[u8]) -> Vec<ServerMessage> {
    match binary_session {
        Some(session_id) => feed_opus_chunk(state, session_id, data).await,
        None => vec![error_message(
            None,
            ErrorCode::SessionNotFound,
            "binary frame received with no active binary stream session",
        )],
    }
}

async fn feed_chunk(
    state: &AppState,
    session_id: &str,
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> Vec<ServerMessage> {
    let session = match state.registry.get(session_id).await {
        Ok(s) => s,
        Err(e) => return vec![lookup_error(session_id, e)],
    };

    let _permit = state.backend_semaphore.acquire().await.expect("backend semaphore never closed");
    match session.feed_pcm(samples, sample_rate, channels).await {
        Ok(result) => vec![
            ServerMessage::ChunkReceived {
                session_id: session_id.to_string(),
                samples_decoded: samples.len(),
                total_duration: result.audio_duration_seconds,
            },
            ServerMessage::PartialResult {
                session_id: session_id.to_string(),
                confirmed_text: result.confirmed_text,
                tentative_text: result.tentative_text,
                is_final: result.is_final,
            },
        ],
        Err(e) => {
            abort_on_internal_error(state, session_id, &e).await;
            vec![session_error(session_id, e)]
        }
    }
}

async fn feed_opus_chunk(state: &AppState, session_id: &str, packet: &[u8]) -> Vec<ServerMessage> {
    let session = match state.registry.get(session_id).await {
        Ok(s) => s,
        Err(e) => return vec![lookup_error(session_id, e)],
    };

    let _permit = state.backend_semaphore.acquire().await.expect("backend semaphore never closed");
    match session.feed_opus(packet).await {
        Ok(result) => vec![
            ServerMessage::ChunkReceived {
                session_id: session_id.to_string(),
                samples_decoded: 0,
                total_duration: result.audio_duration_seconds,
            },
            ServerMessage::PartialResult {
                session_id: session_id.to_string(),
                confirmed_text: result.confirmed_text,
                tentative_text: result.tentative_text,
                is_final: result.is_final,
            },
        ],
        Err(e) => {
            abort_on_internal_error(state, session_id, &e).await;
            vec![session_error(session_id, e)]
        }
    }
}

/// `SessionError::Internal` means the session's own state is unrecoverable
/// (e.g. its Opus decoder was never initialized); per spec, the session must
/// be aborted so it can't linger ACTIVE and accept further chunks, and so
/// exactly one terminal message (this error, no `stream_transcription_complete`)
/// is ever emitted for it.
async fn abort_on_internal_error(state: &AppState, session_id: &str, e: &SessionError) {
    if e.code() == ErrorCode::InternalError {
        if let Some(session) = state.registry.remove(session_id).await {
            session.abort().await;
            warn!(session_id = %session_id, "session aborted after internal error");
        }
    }
}

async fn finish_session(state: &AppState, session_id: &str) -> Vec<ServerMessage> {
    let session = match state.registry.get(session_id).await {
        Ok(s) => s,
        Err(e) => return vec![lookup_error(session_id, e)],
    };

    let _permit = state.backend_semaphore.acquire().await.expect("backend semaphore never closed");
    let response = match session.end().await {
        Ok(result) => ServerMessage::StreamTranscriptionComplete {
            session_id: session_id.to_string(),
            confirmed_text: result.confirmed_text,
            audio_duration: result.audio_duration_seconds,
            language: "auto".to_string(),
            backend: state.backend_name.clone(),
            success: true,
            error: None,
        },
        Err(e) => ServerMessage::StreamTranscriptionComplete {
            session_id: session_id.to_string(),
            confirmed_text: String::new(),
            audio_duration: 0.0,
            language: "auto".to_string(),
            backend: state.backend_name.clone(),
            success: false,
            error: Some(e.to_string()),
        },
    };

    state.registry.remove(session_id).await;
    info!(session_id = %session_id, "session finalized");
    vec![response]
}

fn lookup_error(session_id: &str, e: RegistryError) -> ServerMessage {
    error_message(Some(session_id.to_string()), e.code(), e.to_string())
}

fn session_error(session_id: &str, e: SessionError) -> ServerMessage {
    error_message(Some(session_id.to_string()), e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use streaming_core::backend::StubBackend;

    async fn state() -> AppState {
        let backend = Arc::new(StubBackend::new());
        backend.load().await.unwrap();
        AppState::new(backend, "stub".to_string(), Settings::default())
    }

    #[tokio::test]
    async fn start_stream_then_end_stream_round_trips() {
        let state = state().await;
        let mut binary_session = None;

        let started = dispatch(
            &state,
            "client-1",
            ClientMessage::StartStream {
                session_id: "s-1".to_string(),
                sample_rate: 16000,
                channels: 1,
                binary: false,
                wake_word_enabled: None,
            },
            &mut binary_session,
        )
        .await;
        assert!(matches!(started[0], ServerMessage::StreamStarted { .. }));

        let finished = dispatch(
            &state,
            "client-1",
            ClientMessage::EndStream {
                session_id: "s-1".to_string(),
                expected_chunks: None,
            },
            &mut binary_session,
        )
        .await;
        match &finished[0] {
            ServerMessage::StreamTranscriptionComplete { success, .. } => assert!(success),
            _ => panic!("expected StreamTranscriptionComplete"),
        }
    }

    #[tokio::test]
    async fn unsupported_sample_rate_is_rejected_at_start() {
        let state = state().await;
        let mut binary_session = None;
        let result = dispatch(
            &state,
            "client-1",
            ClientMessage::StartStream {
                session_id: "s-1".to_string(),
                sample_rate: 44100,
                channels: 1,
                binary: false,
                wake_word_enabled: None,
            },
            &mut binary_session,
        )
        .await;
        match &result[0] {
            ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::UnsupportedSampleRate),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn chunk_for_unknown_session_reports_not_found() {
        let state = state().await;
        let result = feed_chunk(&state, "missing", &[0i16; 160], 16000, 1).await;
        match &result[0] {
            ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::SessionNotFound),
            _ => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn internal_session_error_aborts_the_session() {
        let state = state().await;
        let mut binary_session = None;

        dispatch(
            &state,
            "client-1",
            ClientMessage::StartStream {
                session_id: "s-1".to_string(),
                sample_rate: 16000,
                channels: 1,
                binary: false,
                wake_word_enabled: None,
            },
            &mut binary_session,
        )
        .await;

        // This session was started without an Opus decoder (binary: false);
        // feeding it an Opus-tagged packet hits `SessionError::Internal`.
        let result = feed_opus_chunk(&state, "s-1", &[0u8; 4]).await;
        match &result[0] {
            ServerMessage::Error { code, .. } => assert_eq!(*code, ErrorCode::InternalError),
            other => panic!("expected internal error, got {other:?}"),
        }

        let lookup = state.registry.get("s-1").await;
        assert!(
            matches!(lookup, Err(RegistryError::NotFound)),
            "session should have been removed from the registry after an internal error"
        );
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let state = state().await;
        let mut binary_session = None;
        let result = dispatch(&state, "client-1", ClientMessage::Ping, &mut binary_session).await;
        assert!(matches!(result[0], ServerMessage::Pong { .. }));
    }
}

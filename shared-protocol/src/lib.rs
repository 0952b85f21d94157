//! Wire protocol shared between the transcription server and its clients.
//!
//! Messages are carried as framed JSON text; raw binary WebSocket frames are
//! treated as implicit Opus audio for whichever session the client most
//! recently started on that connection.

use serde::{Deserialize, Serialize};

/// Sample rate the core pipeline always normalizes audio to before it
/// reaches a streaming strategy or backend.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Sample rates the codec layer accepts on ingress.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000];

pub type SessionId = String;
pub type ClientId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "start_stream")]
    StartStream {
        session_id: SessionId,
        sample_rate: u32,
        channels: u16,
        binary: bool,
        wake_word_enabled: Option<bool>,
    },
    #[serde(rename = "pcm_chunk")]
    PcmChunk {
        session_id: SessionId,
        /// base64-encoded little-endian int16 PCM.
        audio_data: String,
        sample_rate: u32,
        channels: u16,
    },
    #[serde(rename = "audio_chunk")]
    AudioChunk {
        session_id: SessionId,
        /// base64-encoded Opus packet.
        audio_data: String,
    },
    #[serde(rename = "end_stream")]
    EndStream {
        session_id: SessionId,
        expected_chunks: Option<u64>,
    },
    #[serde(rename = "abort_stream")]
    AbortStream { session_id: SessionId },
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "stream_started")]
    StreamStarted {
        session_id: SessionId,
        strategy: String,
        backend: String,
        streaming_enabled: bool,
        wake_word_enabled: bool,
    },
    #[serde(rename = "partial_result")]
    PartialResult {
        session_id: SessionId,
        confirmed_text: String,
        tentative_text: String,
        is_final: bool,
    },
    #[serde(rename = "stream_transcription_complete")]
    StreamTranscriptionComplete {
        session_id: SessionId,
        confirmed_text: String,
        audio_duration: f64,
        language: String,
        backend: String,
        success: bool,
        error: Option<String>,
    },
    #[serde(rename = "chunk_received")]
    ChunkReceived {
        session_id: SessionId,
        samples_decoded: usize,
        total_duration: f64,
    },
    #[serde(rename = "wake_word_detected")]
    WakeWordDetected {
        session_id: SessionId,
        phrase: String,
        confidence: f32,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: f64 },
    #[serde(rename = "error")]
    Error {
        session_id: Option<SessionId>,
        code: ErrorCode,
        message: String,
    },
}

/// Error kinds surfaced to clients, per the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnsupportedSampleRate,
    DecodeError,
    SessionNotFound,
    SessionConflict,
    SessionClosed,
    RateLimited,
    BackendError,
    BackendTimeout,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::UnsupportedSampleRate => "UNSUPPORTED_SAMPLE_RATE",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionConflict => "SESSION_CONFLICT",
            ErrorCode::SessionClosed => "SESSION_CLOSED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::BackendTimeout => "BACKEND_TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stream_round_trips() {
        let msg = ClientMessage::StartStream {
            session_id: "s-1".into(),
            sample_rate: 16000,
            channels: 1,
            binary: true,
            wake_word_enabled: Some(false),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"start_stream\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::StartStream { session_id, .. } => assert_eq!(session_id, "s-1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_code_display_matches_wire_convention() {
        assert_eq!(ErrorCode::SessionClosed.to_string(), "SESSION_CLOSED");
    }

    #[test]
    fn ping_has_no_fields() {
        let json = serde_json::to_string(&ClientMessage::Ping).unwrap();
        assert_eq!(json, "{\"type\":\"ping\"}");
    }
}

use shared_protocol::ErrorCode;
use thiserror::Error;

/// Per-chunk failure in the audio codec layer (C1). The session survives
/// these — only the offending chunk is dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported sample rate: {0}Hz (supported: 8000Hz, 16000Hz)")]
    UnsupportedSampleRate(u32),
    #[error("opus decode failed: {0}")]
    DecodeError(String),
    #[error("channel count must be >= 1, got {0}")]
    InvalidChannelCount(u16),
}

impl CodecError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CodecError::UnsupportedSampleRate(_) => ErrorCode::UnsupportedSampleRate,
            CodecError::DecodeError(_) | CodecError::InvalidChannelCount(_) => {
                ErrorCode::DecodeError
            }
        }
    }
}

/// Control-layer failure from a session operation. These reject the
/// offending message without mutating session state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Closed => ErrorCode::SessionClosed,
            SessionError::Codec(e) => e.code(),
            SessionError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Registry-level failure.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session id already registered")]
    Conflict,
    #[error("no such session")]
    NotFound,
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::Conflict => ErrorCode::SessionConflict,
            RegistryError::NotFound => ErrorCode::SessionNotFound,
        }
    }
}

/// Failure from a backend call (C9). Strategies catch these and fall back
/// to returning the unchanged previous result; they never propagate to the
/// client mid-stream (see finalize-time exception in `StreamTranscriptionComplete`).
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("backend error: {0}")]
    Failed(String),
    #[error("backend call timed out")]
    Timeout,
    #[error("backend not ready")]
    NotReady,
}

impl BackendError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Failed(_) | BackendError::NotReady => ErrorCode::BackendError,
            BackendError::Timeout => ErrorCode::BackendTimeout,
        }
    }
}

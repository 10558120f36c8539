use thiserror::Error;

use crate::engine::session::SessionId;

/// All errors produced by callmatch-core.
#[derive(Debug, Error)]
pub enum CallMatchError {
    #[error("unknown or ended session: {0}")]
    InvalidSession(SessionId),

    #[error("no master call loaded")]
    InvalidReference,

    #[error("session {0} has no voiced frames to score")]
    DegenerateSession(SessionId),

    #[error("failed to load master call '{id}': {reason}")]
    LoadFailure { id: String, reason: String },

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("frame length mismatch: expected {expected} samples, got {got}")]
    FrameLength { expected: usize, got: usize },

    #[error("coefficient count mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("session {0} fingerprint is full — end the session and start a new one")]
    BufferOverflow(SessionId),

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Numeric status reported across a host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    InvalidSession = -1,
    InvalidReference = -2,
    DegenerateSession = -3,
    LoadFailure = -4,
    InvalidParams = -5,
    BufferOverflow = -6,
    Internal = -99,
}

impl CallMatchError {
    /// Status code for this error, used by [`crate::host::HostBridge`].
    pub fn status(&self) -> StatusCode {
        match self {
            CallMatchError::InvalidSession(_) => StatusCode::InvalidSession,
            CallMatchError::InvalidReference => StatusCode::InvalidReference,
            CallMatchError::DegenerateSession(_) => StatusCode::DegenerateSession,
            CallMatchError::LoadFailure { .. } | CallMatchError::Wav(_) => StatusCode::LoadFailure,
            CallMatchError::InvalidParams(_)
            | CallMatchError::FrameLength { .. }
            | CallMatchError::DimensionMismatch { .. } => StatusCode::InvalidParams,
            CallMatchError::BufferOverflow(_) => StatusCode::BufferOverflow,
            CallMatchError::Resampler(_) | CallMatchError::Io(_) | CallMatchError::Other(_) => {
                StatusCode::Internal
            }
        }
    }

    pub(crate) fn load_failure(id: &str, reason: impl Into<String>) -> Self {
        CallMatchError::LoadFailure {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CallMatchError>;

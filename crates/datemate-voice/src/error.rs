//! Error types for the mock-date voice loop

use crate::state::Phase;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while capturing, generating, or speaking
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Input device or speech-recognition permission unavailable.
    #[error("Speech capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Reply generation failed (network, auth, or quota).
    #[error("Reply generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// The generator answered with no text.
    #[error("Reply generator returned no text")]
    EmptyReply,

    /// The TTS vendor reported an exhausted quota in-band.
    #[error("Speech synthesis quota exceeded")]
    SynthesisQuotaExceeded,

    #[error("Speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The session already ended and accepts no further commands.
    #[error("Session closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(err: std::io::Error) -> Self {
        VoiceError::Io(err.to_string())
    }
}

impl From<datemate_core::CoreError> for VoiceError {
    fn from(err: datemate_core::CoreError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

#[cfg(feature = "device")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

#[cfg(feature = "device")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

/// An error surfaced to the caller, with the phase and time it happened.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{source} (phase: {phase}, at: {at})")]
pub struct SessionError {
    pub phase: Phase,
    pub at: DateTime<Utc>,
    #[source]
    pub source: VoiceError,
}

impl SessionError {
    pub fn new(phase: Phase, source: VoiceError) -> Self {
        Self {
            phase,
            at: Utc::now(),
            source,
        }
    }
}

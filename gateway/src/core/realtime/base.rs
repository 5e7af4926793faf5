//! Session lifecycle types shared by the protocol session and its callers.
//!
//! # Lifecycle
//!
//! ```text
//! idle -> connecting -> ready <-> capturing
//!            |           |
//!            v           v
//!          error       error      (any) -> closed
//! ```

use serde::Serialize;
use thiserror::Error;

use super::negotiator::NegotiationError;
use super::token_source::TokenSourceError;
use crate::core::audio::DeviceError;
use crate::core::token::CredentialError;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a voice session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad, missing or malformed credential. Never retried.
    #[error("Credential configuration error: {0}")]
    Config(#[from] CredentialError),

    /// The token could not be obtained
    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),

    /// No candidate endpoint accepted the connection
    #[error("Connection failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// The remote sent an explicit error event
    #[error("Server error: {0}")]
    Protocol(String),

    /// Capture device or audio output unavailable
    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    /// Operation not valid in the current phase
    #[error("Operation not valid while {phase}")]
    InvalidState { phase: SessionPhase },
}

impl From<TokenSourceError> for SessionError {
    fn from(e: TokenSourceError) -> Self {
        match e {
            TokenSourceError::Credential(inner) => SessionError::Config(inner),
            other => SessionError::TokenUnavailable(other.to_string()),
        }
    }
}

impl SessionError {
    /// Short, actionable text for end users. Diagnostics stay in `Display`.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Config(_) => "Voice service is not configured".to_string(),
            SessionError::TokenUnavailable(_) => {
                "Voice service is unavailable, try again later".to_string()
            }
            SessionError::Negotiation(_) => {
                "Could not connect to the voice service, tap to retry".to_string()
            }
            SessionError::Protocol(message) => format!("Voice service error: {message}"),
            SessionError::Device(_) => "Microphone or speaker unavailable".to_string(),
            SessionError::InvalidState { .. } => "Please wait, still connecting".to_string(),
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Lifecycle
// =============================================================================

/// Phase of a [`ProtocolSession`](super::ProtocolSession).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Connecting,
    Ready,
    Capturing,
    Closed,
    Error,
}

impl SessionPhase {
    /// Whether the transport is open in this phase.
    pub fn is_open(self) -> bool {
        matches!(self, SessionPhase::Ready | SessionPhase::Capturing)
    }

    /// Whether the session can no longer be used.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Error)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Ready => "ready",
            SessionPhase::Capturing => "capturing",
            SessionPhase::Closed => "closed",
            SessionPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Observable session activity.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// Partial assistant transcript
    AssistantTranscriptDelta(String),
    /// Complete assistant utterance, trimmed
    AssistantTranscript(String),
    /// Recognized user speech
    UserTranscript(String),
    ResponseDone,
    /// The remote closed an open session
    Disconnected,
    /// A failure, as a short user-facing message
    Error(String),
}

//! Realtime voice protocol message types.
//!
//! Every message is a JSON text frame with a `type` discriminator.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Full session configuration, sent once after connect
//! - input_audio_buffer.append - Append a PCM16 frame to the input buffer
//! - input_audio_buffer.clear - Discard buffered input
//! - input_audio_buffer.commit - Close the current utterance
//! - response.create - Ask for a spoken response
//!
//! Server events (received from server):
//! - error - Error occurred; terminates the session
//! - session.created / session.updated - Session acknowledged
//! - response.audio_transcript.delta - Assistant transcript chunk
//! - response.audio_transcript.done - Assistant transcript complete
//! - conversation.item.input_audio_transcription.completed - Recognized user speech
//! - response.audio.delta - Assistant audio chunk (base64 PCM16, 24 kHz mono)
//! - response.done - Response complete
//!
//! Outbound events are wrapped in an [`Envelope`] carrying `event_id` and
//! `client_timestamp`.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration payload of `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier
    pub model: String,

    /// Response modalities (audio, text)
    pub modalities: Vec<String>,

    /// Behavior instructions for the assistant
    pub instructions: String,

    /// Voice identity
    pub voice: String,

    /// Input audio format
    pub input_audio_format: String,

    /// Output audio format
    pub output_audio_format: String,

    /// Input noise reduction mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,

    /// Vendor extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta_fields: Option<BetaFields>,
}

/// Noise reduction mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseReduction {
    #[serde(rename = "type")]
    pub mode: String,
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(u32),
    /// Unbounded ("inf")
    Infinite(String),
}

impl Default for MaxTokens {
    fn default() -> Self {
        MaxTokens::Infinite("inf".to_string())
    }
}

/// Vendor extension block of the session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetaFields {
    pub chat_mode: String,
    pub tts_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting_config: Option<GreetingConfig>,
}

/// Whether the assistant greets first, and with what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingConfig {
    pub enable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Clear the input audio buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Create an audio append event from raw PCM16 bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::ResponseCreate => "response.create",
        }
    }
}

/// A client event with its structural identifiers.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a> {
    pub event_id: String,
    /// Emission time, epoch milliseconds
    pub client_timestamp: u64,
    #[serde(flatten)]
    pub event: &'a ClientEvent,
}

impl<'a> Envelope<'a> {
    /// Wrap `event` with a fresh UUID v4 and the given timestamp.
    pub fn new(event: &'a ClientEvent, client_timestamp: u64) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            client_timestamp,
            event,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime endpoint.
///
/// Fields are lenient: the upstream is not consistent about which of two
/// spellings it uses, so accessors pick whichever is present.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Structured error details
        #[serde(default)]
        error: Option<ApiError>,
        /// Top-level message, used by some error shapes
        #[serde(default)]
        message: Option<String>,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<serde_json::Value>,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<serde_json::Value>,
    },

    /// Assistant transcript chunk
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: Option<String>,
    },

    /// Assistant transcript complete
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Recognized user speech
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    /// Assistant audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio
        #[serde(default)]
        delta: Option<String>,
        /// Alternate spelling of `delta`
        #[serde(default)]
        audio: Option<String>,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    /// Any other event type
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Human-readable message of an `error` event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ServerEvent::Error { error, message } => Some(
                error
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .or_else(|| message.clone().filter(|m| !m.is_empty()))
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            _ => None,
        }
    }

    /// Base64 audio payload of an `response.audio.delta` event, if non-empty.
    pub fn audio_payload(&self) -> Option<&str> {
        match self {
            ServerEvent::AudioDelta { delta, audio } => delta
                .as_deref()
                .filter(|d| !d.is_empty())
                .or_else(|| audio.as_deref().filter(|a| !a.is_empty())),
            _ => None,
        }
    }

    /// Recognized user text of a transcription event, if non-empty.
    pub fn recognized_text(&self) -> Option<&str> {
        match self {
            ServerEvent::TranscriptionCompleted { transcript, text } => transcript
                .as_deref()
                .filter(|t| !t.is_empty())
                .or_else(|| text.as_deref().filter(|t| !t.is_empty())),
            _ => None,
        }
    }

    /// Decode base64 audio from an audio delta payload.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error code; numeric or string depending on the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<serde_json::Value>,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

//! Realtime voice session over a message-framed duplex connection.
//!
//! # Architecture
//!
//! - [`TokenSource`] produces a fresh token and candidate list per connect
//! - [`ConnectionNegotiator`] tries candidates in order through a [`Connector`]
//! - [`ProtocolSession`] runs the push-to-talk state machine on the winning
//!   [`Transport`]
//! - [`VoiceClient`] owns one session at a time and forwards its events
//!
//! # Audio Format
//!
//! Input is PCM16 LE mono at 16 kHz in 6400-byte frames. Output arrives as
//! base64 PCM16 LE mono at 24 kHz.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ptt_gateway::core::realtime::{SessionContext, VoiceClient, HttpTokenSource, WsConnector};
//!
//! let ctx = SessionContext {
//!     settings: Default::default(),
//!     negotiation: Default::default(),
//!     token_source: Arc::new(HttpTokenSource::new("https://example.com/api/token")?),
//!     connector: Arc::new(WsConnector),
//!     backend,
//!     profile: Default::default(),
//! };
//! let mut client = VoiceClient::new(ctx);
//! client.connect().await?;
//! client.start_capture();
//! // ... user speaks ...
//! client.stop_capture_and_respond();
//! ```

mod base;
mod client;
mod config;
mod messages;
mod negotiator;
mod session;
mod token_source;
mod transport;

pub use base::{SessionError, SessionEvent, SessionPhase, SessionResult};
pub use client::VoiceClient;
pub use config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_GREETING, DEFAULT_INSTRUCTIONS, DEFAULT_MODEL,
    DEFAULT_VOICE, GreetingSettings, NegotiationSettings, SessionSettings,
};
pub use messages::{
    ApiError, BetaFields, ClientEvent, Envelope, GreetingConfig, MaxTokens, NoiseReduction,
    ServerEvent, SessionConfig,
};
pub use negotiator::{AttemptRecord, ConnectionNegotiator, Negotiated, NegotiationError};
pub use session::{ProtocolSession, SessionContext};
pub use token_source::{HttpTokenSource, LocalTokenSource, TokenSource, TokenSourceError};
pub use transport::{AttemptFailure, Connector, Transport, TransportError, WsConnector};

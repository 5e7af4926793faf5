pub mod audio;
pub mod realtime;
pub mod token;

pub use audio::{
    AudioBackend, AudioOutput, CaptureChunker, CaptureDevice, DeviceProfile, DeviceTier,
    PlaybackScheduler,
};
pub use realtime::{
    ConnectionNegotiator, HttpTokenSource, LocalTokenSource, ProtocolSession, SessionContext,
    SessionError, SessionEvent, SessionPhase, VoiceClient, WsConnector,
};
pub use token::{CredentialDiagnostics, TokenGrant, TokenMinter};

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::base::{SessionEvent, SessionPhase, SessionResult};
use super::session::{ProtocolSession, SessionContext};
use crate::core::token::CandidateEndpoint;

const FORWARDER_DRAIN: Duration = Duration::from_secs(1);

/// Long-lived handle that opens a fresh [`ProtocolSession`] per connect.
///
/// Observers subscribe once; events from every session are forwarded to them.
pub struct VoiceClient {
    ctx: SessionContext,
    session: Option<ProtocolSession>,
    events: broadcast::Sender<SessionEvent>,
    forwarder: Option<tokio::task::JoinHandle<()>>,
}

impl VoiceClient {
    pub fn new(ctx: SessionContext) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            ctx,
            session: None,
            events,
            forwarder: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map(ProtocolSession::phase)
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<String> {
        self.session.as_ref().and_then(ProtocolSession::last_error)
    }

    pub fn active_endpoint(&self) -> Option<CandidateEndpoint> {
        self.session.as_ref().and_then(ProtocolSession::active_endpoint)
    }

    /// Tear down any previous session and connect a new one.
    pub async fn connect(&mut self) -> SessionResult<()> {
        if let Some(mut old) = self.session.take() {
            info!("Replacing previous voice session");
            old.shutdown().await;
        }
        // With the old session gone its event channel closes, so the
        // forwarder drains what is left and exits on its own.
        if let Some(mut forwarder) = self.forwarder.take() {
            if tokio::time::timeout(FORWARDER_DRAIN, &mut forwarder).await.is_err() {
                warn!("Event forwarder did not drain in time, aborting");
                forwarder.abort();
            }
        }

        let mut session = ProtocolSession::new(self.ctx.clone());
        let mut rx = session.subscribe();
        let tx = self.events.clone();
        self.forwarder = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let result = session.connect().await;
        self.session = Some(session);
        result
    }

    pub fn start_capture(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(ProtocolSession::start_capture)
    }

    pub fn stop_capture_and_respond(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(ProtocolSession::stop_capture_and_respond)
    }

    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.shutdown().await;
        }
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

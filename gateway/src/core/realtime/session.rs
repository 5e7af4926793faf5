//! Push-to-talk protocol session.
//!
//! A [`ProtocolSession`] owns one connection for one connect/converse/close
//! lifecycle. Three activities touch it concurrently:
//!
//! - the capture thread, which pushes device buffers through the
//!   [`CaptureChunker`] and queues `input_audio_buffer.append` events;
//! - the I/O task, which drains the outbound queue onto the transport and
//!   dispatches inbound events (audio goes to the [`PlaybackScheduler`]);
//! - the control path (`connect`, `start_capture`, `stop_capture_and_respond`,
//!   `shutdown`).
//!
//! Every outbound event goes through one unbounded channel, so the commit and
//! response request always follow the last frame of an utterance. The chunker
//! is the only state shared with the capture thread and sits behind a mutex.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::base::{SessionError, SessionEvent, SessionPhase, SessionResult};
use super::config::{NegotiationSettings, SessionSettings};
use super::messages::{ClientEvent, Envelope, ServerEvent};
use super::negotiator::ConnectionNegotiator;
use super::token_source::TokenSource;
use super::transport::{Connector, Transport};
use crate::core::audio::{
    AudioBackend, AudioOutput, CaptureChunker, CaptureDevice, DeviceProfile, PlaybackScheduler,
};
use crate::core::token::{CandidateContext, CandidateEndpoint, build_candidates, now_ms};

/// Capacity of the observer channel; slow observers skip ahead.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown` waits for the I/O task to close the transport.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to build sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: SessionSettings,
    pub negotiation: NegotiationSettings,
    pub token_source: Arc<dyn TokenSource>,
    pub connector: Arc<dyn Connector>,
    pub backend: Arc<dyn AudioBackend>,
    pub profile: DeviceProfile,
}

#[derive(Debug, Default)]
struct SessionState {
    phase: SessionPhase,
    active_endpoint: Option<CandidateEndpoint>,
    last_error: Option<String>,
}

/// State reachable from the I/O task and the capture thread.
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    capturing: Arc<AtomicBool>,
}

impl Shared {
    fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: SessionPhase) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            debug!(%phase, "Session phase changed");
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    /// Move to `phase` unless the session already reached a terminal phase.
    fn set_phase_unless_terminal(&self, phase: SessionPhase) -> bool {
        let changed = {
            let mut state = self.state.write();
            if state.phase.is_terminal() {
                false
            } else {
                state.phase = phase;
                true
            }
        };
        if changed {
            debug!(%phase, "Session phase changed");
            self.emit(SessionEvent::PhaseChanged(phase));
        }
        changed
    }

    fn record_error(&self, message: String) {
        self.state.write().last_error = Some(message);
    }
}

/// Queues audio frames while capture is active; drops them otherwise.
#[derive(Clone)]
struct FrameSink {
    capturing: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl FrameSink {
    fn send_frame(&self, frame: &[u8]) -> bool {
        if frame.is_empty() || !self.capturing.load(Ordering::SeqCst) {
            return false;
        }
        self.outbound.send(ClientEvent::audio_append(frame)).is_ok()
    }
}

/// One push-to-talk session. See the module docs for the concurrency model.
pub struct ProtocolSession {
    ctx: SessionContext,
    shared: Shared,
    chunker: Arc<Mutex<CaptureChunker>>,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    capture: Option<Box<dyn CaptureDevice>>,
    io_task: Option<JoinHandle<()>>,
}

impl ProtocolSession {
    pub fn new(ctx: SessionContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx,
            shared: Shared {
                state: Arc::new(RwLock::new(SessionState::default())),
                events,
                capturing: Arc::new(AtomicBool::new(false)),
            },
            chunker: Arc::new(Mutex::new(CaptureChunker::new(0))),
            outbound: None,
            capture: None,
            io_task: None,
        }
    }

    /// Observe session activity from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase()
    }

    /// Candidate that accepted the connection.
    pub fn active_endpoint(&self) -> Option<CandidateEndpoint> {
        self.shared.state.read().active_endpoint.clone()
    }

    /// Diagnostic text of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.read().last_error.clone()
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Open devices, fetch a token, negotiate a connection and configure the
    /// remote session. Only valid from `idle`.
    pub async fn connect(&mut self) -> SessionResult<()> {
        let phase = self.phase();
        if phase != SessionPhase::Idle {
            return Err(SessionError::InvalidState { phase });
        }
        self.shared.set_phase(SessionPhase::Connecting);

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release_devices();
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> SessionResult<()> {
        let output = self.ctx.backend.open_output()?;
        let mut capture = self.ctx.backend.open_capture(&self.ctx.profile)?;
        *self.chunker.lock() = CaptureChunker::new(capture.sample_rate());

        let grant = self.ctx.token_source.fetch().await?;
        let local = build_candidates(
            &CandidateContext {
                base_url: &self.ctx.negotiation.base_url,
                token: &grant.token,
                credential: None,
                model: &self.ctx.settings.model,
            },
            &self.ctx.negotiation.strategies,
        );
        let candidates = grant.candidates(local);

        let negotiator = ConnectionNegotiator::new(
            Arc::clone(&self.ctx.connector),
            self.ctx.negotiation.connect_timeout(),
        );
        let negotiated = negotiator.connect(&candidates).await?;
        if !negotiated.failed.is_empty() {
            debug!(
                "Connected after {} failed candidates: {}",
                negotiated.failed.len(),
                negotiated
                    .failed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(output.current_time());
        self.io_task = Some(tokio::spawn(run_io(
            negotiated.transport,
            rx,
            self.shared.clone(),
            scheduler,
            output,
        )));

        {
            let mut state = self.shared.state.write();
            state.active_endpoint = Some(negotiated.endpoint);
            state.last_error = None;
        }
        let session = self.ctx.settings.to_session_config();
        // first message on the wire
        let _ = tx.send(ClientEvent::SessionUpdate { session });

        let sink = FrameSink {
            capturing: Arc::clone(&self.shared.capturing),
            outbound: tx.clone(),
        };
        let chunker = Arc::clone(&self.chunker);
        capture.start(Box::new(move |samples: &[f32]| {
            // Holding the lock while queueing keeps frames ahead of a concurrent commit
            let mut chunker = chunker.lock();
            if !sink.capturing.load(Ordering::SeqCst) {
                return;
            }
            for frame in chunker.push_samples(samples) {
                sink.send_frame(&frame);
            }
        }))?;

        self.capture = Some(capture);
        self.outbound = Some(tx);
        self.shared.set_phase(SessionPhase::Ready);
        info!("Voice session ready");
        Ok(())
    }

    fn fail(&self, e: &SessionError) {
        error!("Voice session failed: {}", e);
        self.shared.record_error(e.to_string());
        self.shared.capturing.store(false, Ordering::SeqCst);
        if self.shared.set_phase_unless_terminal(SessionPhase::Error) {
            self.shared.emit(SessionEvent::Error(e.user_message()));
        }
    }

    // =========================================================================
    // Push-to-talk
    // =========================================================================

    /// `ready -> capturing`. Clears residual input and tells the remote to do
    /// the same. Returns `false` (and does nothing) in any other phase.
    pub fn start_capture(&self) -> bool {
        if self.phase() != SessionPhase::Ready {
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };

        let mut chunker = self.chunker.lock();
        chunker.clear();
        if outbound.send(ClientEvent::InputAudioBufferClear).is_err() {
            return false;
        }
        self.shared.capturing.store(true, Ordering::SeqCst);
        drop(chunker);

        if !self.shared.set_phase_unless_terminal(SessionPhase::Capturing) {
            self.shared.capturing.store(false, Ordering::SeqCst);
            return false;
        }
        debug!("Capture started");
        true
    }

    /// `capturing -> ready`. Sends the partial tail frame, commits the input
    /// buffer and requests a response. Returns `false` in any other phase.
    pub fn stop_capture_and_respond(&self) -> bool {
        if self.phase() != SessionPhase::Capturing {
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };

        {
            let mut chunker = self.chunker.lock();
            let tail = chunker.flush();
            if let Some(tail) = tail {
                let _ = outbound.send(ClientEvent::audio_append(&tail));
            }
            self.shared.capturing.store(false, Ordering::SeqCst);
        }
        let _ = outbound.send(ClientEvent::InputAudioBufferCommit);
        let _ = outbound.send(ClientEvent::ResponseCreate);

        self.shared.set_phase_unless_terminal(SessionPhase::Ready);
        debug!("Capture stopped, response requested");
        true
    }

    /// Queue one frame for sending. Silently dropped unless capturing.
    pub fn send_audio_frame(&self, frame: Bytes) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        if self.phase() != SessionPhase::Capturing {
            return;
        }
        let sink = FrameSink {
            capturing: Arc::clone(&self.shared.capturing),
            outbound: outbound.clone(),
        };
        if !sink.send_frame(&frame) {
            trace!("Dropped audio frame outside capture");
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop capture, close the transport and release the audio output.
    /// Valid from any phase; repeated calls are no-ops.
    pub async fn shutdown(&mut self) {
        self.shared.capturing.store(false, Ordering::SeqCst);
        self.release_devices();
        self.chunker.lock().clear();

        // Dropping the last sender tells the I/O task to close the transport
        self.outbound = None;
        if let Some(mut task) = self.io_task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("I/O task did not stop in time, aborting");
                task.abort();
            }
        }

        self.shared.set_phase(SessionPhase::Closed);
    }

    fn release_devices(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.shared.capturing.store(false, Ordering::SeqCst);
        self.release_devices();
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// I/O task
// =============================================================================

async fn run_io(
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    shared: Shared,
    mut scheduler: PlaybackScheduler,
    mut output: Box<dyn AudioOutput>,
) {
    let mut transcript = String::new();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    // session shut down
                    transport.close().await;
                    break;
                };
                let json = match Envelope::new(&event, now_ms()).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize {}: {}", event.event_type(), e);
                        continue;
                    }
                };
                trace!(event_type = event.event_type(), "Sending event");
                if let Err(e) = transport.send_text(json).await {
                    warn!("Failed to send {}: {}", event.event_type(), e);
                    disconnected(&shared);
                    break;
                }
            }

            inbound = transport.next_text() => {
                match inbound {
                    Some(Ok(text)) => {
                        let keep_going = dispatch(
                            &text,
                            &shared,
                            &mut transcript,
                            &mut scheduler,
                            output.as_mut(),
                        );
                        if !keep_going {
                            transport.close().await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Realtime connection error: {}", e);
                        disconnected(&shared);
                        break;
                    }
                    None => {
                        info!("Realtime connection closed by server");
                        disconnected(&shared);
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = output.close() {
        warn!("Failed to close audio output: {}", e);
    }
}

fn disconnected(shared: &Shared) {
    shared.capturing.store(false, Ordering::SeqCst);
    if shared.phase().is_open() && shared.set_phase_unless_terminal(SessionPhase::Closed) {
        shared.emit(SessionEvent::Disconnected);
    }
}

/// Route one inbound frame. Returns `false` when the session must end.
fn dispatch(
    text: &str,
    shared: &Shared,
    transcript: &mut String,
    scheduler: &mut PlaybackScheduler,
    output: &mut dyn AudioOutput,
) -> bool {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse server event: {}", e);
            return true;
        }
    };

    match &event {
        ServerEvent::Error { .. } => {
            let message = event.error_message().unwrap_or_else(|| "unknown".to_string());
            error!("Server error: {}", message);
            let err = SessionError::Protocol(message);
            shared.record_error(err.to_string());
            shared.capturing.store(false, Ordering::SeqCst);
            if shared.set_phase_unless_terminal(SessionPhase::Error) {
                shared.emit(SessionEvent::Error(err.user_message()));
            }
            return false;
        }
        ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
            debug!("Session acknowledged by server");
        }
        ServerEvent::AudioTranscriptDelta { delta } => {
            if let Some(delta) = delta.as_deref().filter(|d| !d.is_empty()) {
                transcript.push_str(delta);
                shared.emit(SessionEvent::AssistantTranscriptDelta(delta.to_string()));
            }
        }
        ServerEvent::AudioTranscriptDone { .. } => {
            let text = transcript.trim().to_string();
            transcript.clear();
            if !text.is_empty() {
                shared.emit(SessionEvent::AssistantTranscript(text));
            }
        }
        ServerEvent::TranscriptionCompleted { .. } => {
            if let Some(text) = event.recognized_text() {
                shared.emit(SessionEvent::UserTranscript(text.to_string()));
            }
        }
        ServerEvent::AudioDelta { .. } => {
            if let Some(audio) = event.audio_payload() {
                if let Err(e) = scheduler.enqueue(audio, output) {
                    warn!("Dropping audio chunk: {}", e);
                }
            }
        }
        ServerEvent::ResponseDone { .. } => shared.emit(SessionEvent::ResponseDone),
        ServerEvent::Unknown => trace!("Ignoring unrecognized server event"),
    }
    true
}

//! Shared fixtures: mock realtime servers and an in-memory audio backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};

use ptt_gateway::core::audio::{
    AudioBackend, AudioOutput, CaptureCallback, CaptureDevice, DeviceError, DeviceProfile,
};

// =============================================================================
// Mock realtime server
// =============================================================================

/// What the handshake carried.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
}

enum Action {
    Send(String),
    Close,
}

/// Accepts every connection, records inbound JSON and forwards scripted
/// messages to the most recent connection.
pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<Value>>>,
    pub handshakes: Arc<Mutex<Vec<Handshake>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Action>>>>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(Mutex::new(None));

        let server = Self {
            addr,
            received: Arc::clone(&received),
            handshakes: Arc::clone(&handshakes),
            current: Arc::clone(&current),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (tx, rx) = mpsc::unbounded_channel();
                *current.lock() = Some(tx);
                tokio::spawn(handle_connection(
                    stream,
                    rx,
                    Arc::clone(&received),
                    Arc::clone(&handshakes),
                ));
            }
        });

        server
    }

    pub fn url(&self) -> String {
        format!("ws://{}/rt", self.addr)
    }

    pub fn send(&self, event: Value) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Action::Send(event.to_string()));
        }
    }

    pub fn close(&self) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Action::Close);
        }
    }

    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Wait until at least `count` messages have arrived.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            {
                let received = self.received.lock();
                if received.len() >= count {
                    return received.clone();
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} messages, got {:?}",
                self.received_types()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut actions: mpsc::UnboundedReceiver<Action>,
    received: Arc<Mutex<Vec<Value>>>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
) {
    let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        handshakes.lock().push(Handshake {
            uri: request.uri().to_string(),
            authorization: request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
        Ok(response)
    };
    let Ok(ws) = accept_hdr_async(stream, record).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            action = actions.recv() => match action {
                Some(Action::Send(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Action::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        received.lock().push(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Rejects every handshake with `status` and `body`.
pub async fn start_rejecting_server(status: u16, body: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let reject = move |_request: &Request, _response: Response| -> Result<Response, ErrorResponse> {
                    let mut error = ErrorResponse::new(Some(body.to_string()));
                    *error.status_mut() = StatusCode::from_u16(status).unwrap();
                    Err(error)
                };
                let _ = accept_hdr_async(stream, reject).await;
            });
        }
    });

    (addr, attempts)
}

/// Accepts TCP connections and never answers the handshake.
pub async fn start_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

// =============================================================================
// In-memory audio backend
// =============================================================================

/// A microphone the test drives by hand.
#[derive(Clone)]
pub struct ManualMic {
    rate: u32,
    callback: Arc<Mutex<Option<CaptureCallback>>>,
}

impl ManualMic {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Deliver one buffer. Returns `false` when the device is not started.
    pub fn feed(&self, samples: &[f32]) -> bool {
        match self.callback.lock().as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.callback.lock().is_some()
    }
}

struct ManualCapture {
    mic: ManualMic,
}

impl CaptureDevice for ManualCapture {
    fn sample_rate(&self) -> u32 {
        self.mic.rate
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<(), DeviceError> {
        let mut slot = self.mic.callback.lock();
        if slot.is_some() {
            return Err(DeviceError::AlreadyCapturing);
        }
        *slot = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.mic.callback.lock().take();
    }
}

/// Records `(start_at, frames)` for every scheduled chunk.
struct RecordingOutput {
    played: Arc<Mutex<Vec<(f64, usize)>>>,
    closed: Arc<AtomicBool>,
}

impl AudioOutput for RecordingOutput {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<(), DeviceError> {
        self.played.lock().push((start_at, samples.len()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct TestBackend {
    pub mic: ManualMic,
    pub played: Arc<Mutex<Vec<(f64, usize)>>>,
    pub output_closed: Arc<AtomicBool>,
    pub deny_capture: bool,
}

impl TestBackend {
    pub fn new(device_rate: u32) -> Self {
        Self {
            mic: ManualMic::new(device_rate),
            played: Arc::new(Mutex::new(Vec::new())),
            output_closed: Arc::new(AtomicBool::new(false)),
            deny_capture: false,
        }
    }
}

impl AudioBackend for TestBackend {
    fn open_capture(&self, _profile: &DeviceProfile) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if self.deny_capture {
            return Err(DeviceError::CaptureUnavailable("permission denied".to_string()));
        }
        Ok(Box::new(ManualCapture {
            mic: self.mic.clone(),
        }))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError> {
        Ok(Box::new(RecordingOutput {
            played: Arc::clone(&self.played),
            closed: Arc::clone(&self.output_closed),
        }))
    }
}

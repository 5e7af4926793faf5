//! Message-framed duplex transport and the connector that opens it.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::trace;

use crate::core::token::CandidateEndpoint;

/// Errors on an open transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}

/// An open, message-framed duplex connection carrying JSON text frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text frame. `None` once the peer has closed.
    ///
    /// Cancel-safe: dropping the future loses no frame.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Never fails.
    async fn close(&mut self);
}

#[async_trait]
impl<S> Transport for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Close(frame)) => {
                    trace!("Peer closed: {:?}", frame);
                    return None;
                }
                // pings are answered by tungstenite on the next read
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = WebSocketStream::close(self, None).await {
            trace!("Close after shutdown: {}", e);
        }
    }
}

/// Why a single candidate did not open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("closed before open (status {status}){}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ClosedBeforeOpen {
        status: u16,
        reason: Option<String>,
    },

    #[error("server error: {0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Opens a transport to one candidate. Timeouts are applied by the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, candidate: &CandidateEndpoint)
    -> Result<Box<dyn Transport>, AttemptFailure>;
}

/// Connects with `tokio-tungstenite`, TLS via rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        candidate: &CandidateEndpoint,
    ) -> Result<Box<dyn Transport>, AttemptFailure> {
        let mut request = candidate
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        for (name, value) in &candidate.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AttemptFailure::Transport(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| AttemptFailure::Transport(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => Ok(Box::new(stream)),
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status().as_u16();
                let body = response.body().as_deref().unwrap_or_default();
                Err(classify_rejection(status, body))
            }
            Err(e) => Err(AttemptFailure::Transport(e.to_string())),
        }
    }
}

/// A handshake rejected with a JSON error body counts as a remote error;
/// anything else is a close before open.
pub(crate) fn classify_rejection(status: u16, body: &[u8]) -> AttemptFailure {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("msg"))
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .and_then(|m| m.as_str());
        if let Some(message) = message {
            return AttemptFailure::Remote(message.to_string());
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    AttemptFailure::ClosedBeforeOpen {
        status,
        reason: (!text.is_empty()).then(|| text.chars().take(200).collect()),
    }
}

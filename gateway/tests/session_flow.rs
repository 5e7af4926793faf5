//! Push-to-talk session against a mock realtime server.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use base64::prelude::BASE64_STANDARD;
use serde_json::json;
use tokio::sync::broadcast;

use common::{MockRealtimeServer, TestBackend, start_rejecting_server};
use ptt_gateway::core::audio::{DeviceProfile, f32_to_pcm16_le};
use ptt_gateway::core::realtime::{
    LocalTokenSource, NegotiationError, NegotiationSettings, ProtocolSession, SessionContext,
    SessionError, SessionEvent, SessionPhase, SessionSettings, VoiceClient, WsConnector,
};
use ptt_gateway::core::token::{CredentialError, TokenMinter, default_strategies};

const CREDENTIAL: &str = "abc123.supersecretvalue1234";

fn context(base_url: &str, credential: &str, backend: &TestBackend) -> SessionContext {
    let negotiation = NegotiationSettings {
        base_url: base_url.to_string(),
        connect_timeout_ms: 2000,
        strategies: default_strategies(),
    };
    SessionContext {
        settings: SessionSettings::default(),
        token_source: Arc::new(LocalTokenSource::new(
            credential,
            TokenMinter::default(),
            base_url,
            negotiation.strategies.clone(),
        )),
        negotiation,
        connector: Arc::new(WsConnector),
        backend: Arc::new(backend.clone()),
        profile: DeviceProfile::default(),
    }
}

/// Collect events until `stop` matches or two seconds pass.
async fn collect_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    stop: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while let Ok(event) = rx.recv().await {
            let done = stop(&event);
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    events
}

fn decoded_len(event: &serde_json::Value) -> usize {
    BASE64_STANDARD
        .decode(event["audio"].as_str().unwrap())
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_push_to_talk_event_order() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));

    session.connect().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert!(backend.mic.is_started());
    assert!(session.active_endpoint().unwrap().label.starts_with("query:token"));

    // session.update is the first message on the wire
    let first = server.wait_for_messages(1).await;
    assert_eq!(first[0]["type"], "session.update");
    assert_eq!(first[0]["session"]["model"], "glm-realtime");
    assert_eq!(first[0]["session"]["voice"], "tongtong");
    assert!(first[0]["event_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(first[0]["client_timestamp"].as_u64().is_some());

    // audio outside capture never leaves the device
    backend.mic.feed(&[0.2; 3200]);

    assert!(session.start_capture());
    assert_eq!(session.phase(), SessionPhase::Capturing);
    assert!(!session.start_capture());

    // 250 ms at 16 kHz: one full frame plus a 1600-byte tail
    backend.mic.feed(&[0.1; 4000]);
    assert!(session.stop_capture_and_respond());
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert!(!session.stop_capture_and_respond());

    let messages = server.wait_for_messages(6).await;
    assert_eq!(
        server.received_types(),
        vec![
            "session.update",
            "input_audio_buffer.clear",
            "input_audio_buffer.append",
            "input_audio_buffer.append",
            "input_audio_buffer.commit",
            "response.create",
        ]
    );
    assert_eq!(decoded_len(&messages[2]), 6400);
    assert_eq!(decoded_len(&messages[3]), 1600);

    let ids: std::collections::HashSet<_> = messages
        .iter()
        .map(|m| m["event_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), messages.len());

    // audio after stop is dropped again
    backend.mic.feed(&[0.1; 3200]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received.lock().len(), 6);

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(!backend.mic.is_started());
    assert!(backend.output_closed.load(Ordering::SeqCst));

    // idempotent
    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn test_inbound_events_reach_observers_and_playback() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    server.wait_for_messages(1).await;

    let chunk = BASE64_STANDARD.encode(f32_to_pcm16_le(&[0.25; 2400]));
    server.send(json!({"type": "session.updated", "session": {}}));
    server.send(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": "你好"
    }));
    server.send(json!({"type": "response.audio_transcript.delta", "delta": "Hi"}));
    server.send(json!({"type": "response.audio_transcript.delta", "delta": " there "}));
    server.send(json!({"type": "response.audio_transcript.done"}));
    server.send(json!({"type": "response.audio.delta", "delta": chunk}));
    server.send(json!({"type": "response.audio.delta", "audio": chunk}));
    server.send(json!({"type": "heartbeat"}));
    server.send(json!({"type": "response.done"}));

    let received = collect_until(&mut events, |e| *e == SessionEvent::ResponseDone).await;
    let observed: Vec<_> = received
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::PhaseChanged(_)))
        .collect();
    assert_eq!(
        observed,
        vec![
            SessionEvent::UserTranscript("你好".into()),
            SessionEvent::AssistantTranscriptDelta("Hi".into()),
            SessionEvent::AssistantTranscriptDelta(" there ".into()),
            SessionEvent::AssistantTranscript("Hi there".into()),
            SessionEvent::ResponseDone,
        ]
    );

    let played = backend.played.lock().clone();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0].1, 2400);
    // back-to-back: second chunk starts where the first ends
    assert!((played[1].0 - (played[0].0 + 0.1)).abs() < 1e-9);
    assert_eq!(session.phase(), SessionPhase::Ready);

    session.shutdown().await;
}

#[tokio::test]
async fn test_server_error_ends_session() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    server.wait_for_messages(1).await;
    assert!(session.start_capture());

    server.send(json!({"type": "error", "error": {"type": "invalid_request_error", "message": "quota exceeded"}}));

    let received = collect_until(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(received.contains(&SessionEvent::PhaseChanged(SessionPhase::Error)));
    assert!(received.contains(&SessionEvent::Error("Voice service error: quota exceeded".into())));
    assert_eq!(session.phase(), SessionPhase::Error);
    assert!(session.last_error().unwrap().contains("quota exceeded"));

    // nothing more can be sent
    assert!(!session.stop_capture_and_respond());
    assert!(!session.start_capture());

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn test_remote_close_while_ready() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    server.wait_for_messages(1).await;
    server.close();

    let received = collect_until(&mut events, |e| *e == SessionEvent::Disconnected).await;
    assert!(received.contains(&SessionEvent::Disconnected));
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(!session.start_capture());

    session.shutdown().await;
    assert!(backend.output_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_malformed_credential_never_connects() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), "abc123...", &backend));
    let mut events = session.subscribe();

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::Config(CredentialError::Masked)));
    assert_eq!(session.phase(), SessionPhase::Error);
    assert!(server.handshakes.lock().is_empty());
    assert!(!backend.mic.is_started());

    let received = collect_until(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(received.contains(&SessionEvent::Error("Voice service is not configured".into())));
}

#[tokio::test]
async fn test_shutdown_without_connecting() {
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context("ws://127.0.0.1:1/rt", CREDENTIAL, &backend));
    let mut events = session.subscribe();
    assert_eq!(session.phase(), SessionPhase::Idle);

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::PhaseChanged(SessionPhase::Closed)
    );

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(events.try_recv().is_err());

    // a closed session cannot be reused
    assert!(matches!(
        session.connect().await.unwrap_err(),
        SessionError::InvalidState {
            phase: SessionPhase::Closed
        }
    ));
    assert!(!session.start_capture());
}

#[tokio::test]
async fn test_shutdown_after_failed_connect() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), "abc123...", &backend));

    assert!(session.connect().await.is_err());
    assert_eq!(session.phase(), SessionPhase::Error);
    let mut events = session.subscribe();

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(session.last_error().is_some());
    assert!(!backend.mic.is_started());

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
    let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(received, vec![SessionEvent::PhaseChanged(SessionPhase::Closed)]);
}

#[tokio::test]
async fn test_direct_frames_only_sent_while_capturing() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));

    // before connect there is nowhere to send
    session.send_audio_frame(Bytes::from(vec![1u8; 3200]));

    session.connect().await.unwrap();
    session.send_audio_frame(Bytes::from(vec![1u8; 3200]));

    assert!(session.start_capture());
    session.send_audio_frame(Bytes::from(vec![1u8; 3200]));
    session.send_audio_frame(Bytes::new());
    assert!(session.stop_capture_and_respond());
    session.send_audio_frame(Bytes::from(vec![1u8; 3200]));

    let messages = server.wait_for_messages(5).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        server.received_types(),
        vec![
            "session.update",
            "input_audio_buffer.clear",
            "input_audio_buffer.append",
            "input_audio_buffer.commit",
            "response.create",
        ]
    );
    assert_eq!(decoded_len(&messages[2]), 3200);

    session.shutdown().await;
}

#[tokio::test]
async fn test_capture_denied_fails_before_token() {
    let server = MockRealtimeServer::start().await;
    let mut backend = TestBackend::new(16_000);
    backend.deny_capture = true;
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::Device(_)));
    assert_eq!(session.phase(), SessionPhase::Error);
    assert!(server.handshakes.lock().is_empty());
}

#[tokio::test]
async fn test_every_candidate_rejected() {
    let (addr, attempts) =
        start_rejecting_server(401, r#"{"error":{"message":"auth failed"}}"#).await;
    let backend = TestBackend::new(16_000);
    let base_url = format!("ws://{addr}/rt");
    let mut session = ProtocolSession::new(context(&base_url, CREDENTIAL, &backend));

    let err = session.connect().await.unwrap_err();
    let SessionError::Negotiation(NegotiationError::AllFailed { attempts: records }) = &err else {
        panic!("unexpected error: {err:?}");
    };
    // server-issued and locally derived candidates are the same six URLs
    assert_eq!(records.len(), 6);
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    assert_eq!(records[0].index, 1);
    assert_eq!(records[5].index, 6);

    assert_eq!(session.phase(), SessionPhase::Error);
    let diagnostic = session.last_error().unwrap();
    assert!(diagnostic.contains("[1] query:token@127.0.0.1"));
    assert!(diagnostic.contains("[6] query:Authorization:bearer@127.0.0.1"));
    assert!(!diagnostic.contains(CREDENTIAL));
    assert!(!backend.mic.is_started());
}

#[tokio::test]
async fn test_connect_only_from_idle() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut session = ProtocolSession::new(context(&server.url(), CREDENTIAL, &backend));

    assert!(!session.start_capture());
    assert!(!session.stop_capture_and_respond());

    session.connect().await.unwrap();
    let err = session.connect().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            phase: SessionPhase::Ready
        }
    ));
    assert_eq!(server.handshakes.lock().len(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_client_reconnect_replaces_session() {
    let server = MockRealtimeServer::start().await;
    let backend = TestBackend::new(16_000);
    let mut client = VoiceClient::new(context(&server.url(), CREDENTIAL, &backend));
    let mut events = client.subscribe();

    client.connect().await.unwrap();
    server.wait_for_messages(1).await;
    assert_eq!(client.phase(), SessionPhase::Ready);

    client.connect().await.unwrap();
    assert_eq!(client.phase(), SessionPhase::Ready);
    assert_eq!(server.handshakes.lock().len(), 2);
    // the first session released the microphone before the second opened it
    assert!(backend.mic.is_started());

    // the first session's close reaches observers before the second connects
    let received = collect_until(&mut events, |_| false).await;
    let phases: Vec<SessionPhase> = received
        .iter()
        .filter_map(|e| match e {
            SessionEvent::PhaseChanged(phase) => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SessionPhase::Connecting,
            SessionPhase::Ready,
            SessionPhase::Closed,
            SessionPhase::Connecting,
            SessionPhase::Ready,
        ]
    );

    client.shutdown().await;
    assert_eq!(client.phase(), SessionPhase::Closed);
}

//! Integration tests for the call engine (telephony events -> provider audio)
//!
//! A scripted telephony driver feeds events to the engine while a local
//! WebSocket server stands in for the speech provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use sip_agent_agent::{
    AgentError, CallAudioPort, CallEngine, CallId, CallSession, CallState, TelephonyDriver,
    TelephonyEvent, Timer,
};
use sip_agent_config::Settings;
use sip_agent_core::AudioFrame;

struct ScriptedDriver {
    event_tx: broadcast::Sender<TelephonyEvent>,
    ports: parking_lot::Mutex<HashMap<CallId, CallAudioPort>>,
    dialed: parking_lot::Mutex<Vec<String>>,
    answered: parking_lot::Mutex<Vec<CallId>>,
    next_id: AtomicUsize,
}

impl ScriptedDriver {
    fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            event_tx,
            ports: parking_lot::Mutex::new(HashMap::new()),
            dialed: parking_lot::Mutex::new(Vec::new()),
            answered: parking_lot::Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        })
    }

    /// Send once the engine's event loop has subscribed; events sent before
    /// that would be dropped by the broadcast channel.
    async fn emit(&self, event: TelephonyEvent) {
        for _ in 0..200 {
            if self.event_tx.receiver_count() > 0 {
                let _ = self.event_tx.send(event);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("telephony event had no subscriber");
    }
}

#[async_trait]
impl TelephonyDriver for ScriptedDriver {
    async fn register(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn dial(&self, uri: &str) -> Result<CallId, AgentError> {
        self.dialed.lock().push(uri.to_string());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(CallId::new(format!("call-{n}")))
    }

    async fn answer(&self, call_id: &CallId) -> Result<(), AgentError> {
        self.answered.lock().push(call_id.clone());
        Ok(())
    }

    async fn hangup(&self, _call_id: &CallId) -> Result<(), AgentError> {
        Ok(())
    }

    async fn attach_media(&self, call_id: &CallId, port: CallAudioPort) -> Result<(), AgentError> {
        self.ports.lock().insert(call_id.clone(), port);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TelephonyEvent> {
        self.event_tx.subscribe()
    }
}

struct InstantTimer;

#[async_trait]
impl Timer for InstantTimer {
    async fn sleep(&self, _duration: Duration) {}
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.sip.domain = "sip.test".to_string();
    settings.sip.user = "agent".to_string();
    settings.sip.password = "secret".to_string();
    settings.provider.api_key = "test-key".to_string();
    settings.provider.agent_id = "agent-1".to_string();
    settings.audio.drain_timeout_ms = 50;
    settings.audio.playback_poll_timeout_ms = 5;
    settings
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

async fn wait_for_state(session: &CallSession, want: CallState) {
    for _ in 0..200 {
        if session.state().await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {want:?}");
}

/// Stand-in provider speaking the legacy dialect: checks the config
/// handshake, echoes one frame of 0x5A audio after the first capture frame,
/// and returns the captured bytes.
async fn spawn_provider_server() -> (String, tokio::task::JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let handshake = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            other => panic!("expected config message, got {other:?}"),
        };
        let config: serde_json::Value = serde_json::from_str(&handshake).unwrap();
        assert_eq!(config["agent_id"], "agent-1");
        assert_eq!(config["sample_rate"], 16000);
        assert_eq!(config["encoding"], "linear16");

        let mut first_capture = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Binary(payload)) => {
                    if first_capture.is_empty() {
                        first_capture = payload.to_vec();
                        ws.send(Message::binary(vec![0x5A; payload.len()]))
                            .await
                            .unwrap();
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        first_capture
    });
    (format!("ws://{addr}"), handle)
}

/// Inbound call: answered, provider session established, audio flows both
/// ways, and a BYE tears everything down.
#[tokio::test(flavor = "multi_thread")]
async fn test_inbound_call_full_lifecycle() {
    let (base_url, server) = spawn_provider_server().await;
    let driver = ScriptedDriver::new();
    let mut settings = test_settings();
    settings.provider.base_url = base_url;

    let engine = CallEngine::new(
        Arc::clone(&driver) as Arc<dyn TelephonyDriver>,
        Arc::new(settings),
    );
    tokio::spawn(Arc::clone(&engine).run());

    let call_id = CallId::new("call-in");
    driver
        .emit(TelephonyEvent::IncomingCall {
            call_id: call_id.clone(),
            remote_uri: "sip:caller@example.com".to_string(),
        })
        .await;
    wait_until(|| !driver.answered.lock().is_empty()).await;
    assert_eq!(engine.active_calls(), 1);

    // Confirm plus media-active: the second activation must be a no-op
    driver
        .emit(TelephonyEvent::CallConfirmed {
            call_id: call_id.clone(),
        })
        .await;
    driver
        .emit(TelephonyEvent::MediaActive {
            call_id: call_id.clone(),
        })
        .await;

    let session = engine.session(&call_id).unwrap();
    wait_for_state(&session, CallState::Established).await;

    let port = driver.ports.lock().get(&call_id).cloned().unwrap();
    let capture =
        AudioFrame::from_pcm16(vec![0x42; port.format().frame_bytes()], port.format()).unwrap();
    assert!(port.push_capture(capture));

    // The caller hears what the provider sent back; silence until it lands
    let mut heard = None;
    for _ in 0..200 {
        let frame = port.next_playback_frame();
        if frame.bytes().first() == Some(&0x5A) {
            heard = Some(frame);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let heard = heard.expect("no provider audio reached the caller");
    assert!(heard.bytes().iter().all(|b| *b == 0x5A));

    driver
        .emit(TelephonyEvent::CallDisconnected {
            call_id: call_id.clone(),
            status_code: None,
        })
        .await;
    wait_until(|| engine.active_calls() == 0).await;
    assert!(engine.session(&call_id).is_none());

    let captured = server.await.unwrap();
    assert_eq!(captured, vec![0x42u8; 640]);
}

/// Outbound call rejected with 486 twice: one redial, then the target is
/// abandoned once the attempt limit is reached.
#[tokio::test(flavor = "multi_thread")]
async fn test_outbound_rejection_exhausts_retries() {
    let driver = ScriptedDriver::new();
    let mut settings = test_settings();
    settings.sip.invite_max_attempts = 1;

    let engine = CallEngine::with_timer(
        Arc::clone(&driver) as Arc<dyn TelephonyDriver>,
        Arc::new(settings),
        Arc::new(InstantTimer),
    );
    tokio::spawn(Arc::clone(&engine).run());

    let first = engine.place_call("sip:lead@example.com").await.unwrap();
    assert_eq!(first.as_str(), "call-0");
    assert_eq!(engine.active_calls(), 1);

    driver
        .emit(TelephonyEvent::CallDisconnected {
            call_id: first,
            status_code: Some(486),
        })
        .await;
    wait_until(|| driver.dialed.lock().len() == 2).await;
    wait_until(|| engine.session(&CallId::new("call-1")).is_some()).await;

    driver
        .emit(TelephonyEvent::CallDisconnected {
            call_id: CallId::new("call-1"),
            status_code: Some(486),
        })
        .await;
    wait_until(|| engine.active_calls() == 0).await;

    // Retries are exhausted; no further dial may happen
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.dialed.lock().len(), 2);
}

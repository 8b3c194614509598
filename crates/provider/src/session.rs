//! Shared session contract and connection plumbing

use crate::ProviderError;
use async_trait::async_trait;
use sip_agent_config::{ProviderConfig, ProviderMode};
use sip_agent_core::audio::AudioFormat;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything a dialect needs to open and drive one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: ProviderMode,
    pub base_url: String,
    pub api_key: String,
    pub agent_id: String,
    pub model: String,
    pub voice: String,
    pub temperature: f64,
    pub system_prompt: String,
    pub format: AudioFormat,
    pub commit_on_send_end: bool,
    pub commit_on_response_completed: bool,
    pub commit_on_close: bool,
}

impl SessionConfig {
    /// Build from validated settings plus the call's audio format
    pub fn from_settings(provider: &ProviderConfig, format: AudioFormat) -> Self {
        Self {
            mode: provider.mode,
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
            agent_id: provider.agent_id.clone(),
            model: provider.model.clone(),
            voice: provider.voice.clone(),
            temperature: provider.temperature,
            system_prompt: provider.system_prompt.clone(),
            format,
            commit_on_send_end: provider.commit_on_send_end,
            commit_on_response_completed: provider.commit_on_response_completed,
            commit_on_close: provider.commit_on_close,
        }
    }
}

/// One open provider connection bound to a call's audio bridge.
///
/// `run` owns the socket until the session ends: it pumps capture frames out,
/// feeds received audio into the bridge, and performs the close sequence on
/// every exit path (playback flush, dialect close handshake, socket close).
#[async_trait]
pub trait ProviderSession: Send {
    /// Dialect label used in logs and metrics
    fn mode(&self) -> &'static str;

    /// Drive the session until the capture stream ends, the peer closes or
    /// errors, or `shutdown` fires.
    async fn run(self: Box<Self>, shutdown: broadcast::Receiver<()>)
        -> Result<(), ProviderError>;
}

/// Turn a url into a connect request carrying the bearer token
pub(crate) fn authorized_request(url: &str, api_key: &str) -> Result<Request, ProviderError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ProviderError::Handshake(format!("invalid provider url: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProviderError::Handshake("api key is not a valid header value".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}

pub(crate) async fn connect(request: Request) -> Result<WsStream, ProviderError> {
    match connect_async(request).await {
        Ok((ws, response)) => {
            debug!(status = %response.status(), "websocket connected");
            Ok(ws)
        }
        Err(WsError::Http(response)) => Err(ProviderError::Handshake(format!(
            "provider rejected connection: {}",
            response.status()
        ))),
        Err(e) => Err(ProviderError::Transport(e)),
    }
}

/// Rough token estimate for outbound audio: one token per ~1000 bytes.
/// Good enough for capacity dashboards, nothing more.
pub(crate) fn estimate_tokens(bytes: u64) -> u64 {
    bytes / 1000
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::SessionConfig;
    use sip_agent_bridge::{AudioBridge, BridgeConfig};
    use sip_agent_config::ProviderMode;
    use sip_agent_core::audio::AudioFormat;
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    pub(crate) type ServerWs = WebSocketStream<TcpStream>;

    /// Bind a one-connection WebSocket server. Await the returned handle at
    /// the end of the test so handler assertions surface.
    pub(crate) async fn spawn_ws_server<F, Fut>(handler: F) -> (String, JoinHandle<()>)
    where
        F: FnOnce(ServerWs) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        (url, handle)
    }

    pub(crate) fn test_config(mode: ProviderMode, base_url: &str) -> SessionConfig {
        SessionConfig {
            mode,
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            agent_id: "agent-1".to_string(),
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            temperature: 0.3,
            system_prompt: "You are a helpful voice assistant.".to_string(),
            format: AudioFormat::default(),
            commit_on_send_end: true,
            commit_on_response_completed: true,
            commit_on_close: true,
        }
    }

    pub(crate) fn test_bridge() -> Arc<AudioBridge> {
        Arc::new(AudioBridge::new(
            AudioFormat::default(),
            BridgeConfig {
                max_pending_frames: 16,
                enqueue_timeout: Duration::from_millis(50),
                playback_poll_timeout: Duration::from_millis(5),
            },
        ))
    }
}

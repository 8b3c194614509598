//! Legacy dialect: one JSON config message, then raw binary PCM both ways
//!
//! The stream has no framing beyond the socket itself; whatever binary chunk
//! sizes the provider sends are reassembled into exact frames by the bridge.
//! Stream end is implicit at socket close.

use crate::session::{
    authorized_request, connect, estimate_tokens, ProviderSession, SessionConfig, WsStream,
};
use crate::wire::LegacyConfig;
use crate::ProviderError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use sip_agent_bridge::AudioBridge;
use sip_agent_core::observability;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

pub struct LegacySession {
    ws: WsStream,
    bridge: Arc<AudioBridge>,
}

impl LegacySession {
    /// Connect and send the one-shot stream configuration
    pub(crate) async fn open(
        config: &SessionConfig,
        bridge: Arc<AudioBridge>,
    ) -> Result<Self, ProviderError> {
        let url = format!("{}/v1/audio/speech", config.base_url);
        let mut request = authorized_request(&url, &config.api_key)?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut ws = connect(request).await?;

        let hello = LegacyConfig::new(&config.agent_id, &config.format);
        ws.send(Message::text(serde_json::to_string(&hello)?))
            .await?;

        observability::record_provider_request("legacy");
        observability::provider_connection_opened("legacy");
        info!(
            agent_id = %config.agent_id,
            sample_rate = config.format.sample_rate.as_u32(),
            "legacy provider session opened"
        );

        Ok(Self { ws, bridge })
    }
}

#[async_trait]
impl ProviderSession for LegacySession {
    fn mode(&self) -> &'static str {
        "legacy"
    }

    async fn run(
        self: Box<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProviderError> {
        let Self { ws, bridge } = *self;
        let (mut sink, mut stream) = ws.split();

        let mut frames_sent: u64 = 0;
        let mut bytes_sent: u64 = 0;
        let mut chunks_received: u64 = 0;
        let mut bytes_received: u64 = 0;
        let mut outcome: Result<(), ProviderError> = Ok(());

        loop {
            tokio::select! {
                captured = bridge.next_capture_frame() => match captured {
                    Some(frame) => {
                        bytes_sent += frame.len() as u64;
                        if let Err(e) = sink.send(Message::binary(frame.into_bytes())).await {
                            error!(error = %e, "failed to send audio frame");
                            outcome = Err(ProviderError::Transport(e));
                            break;
                        }
                        frames_sent += 1;
                        if frames_sent % 100 == 0 {
                            debug!(frames_sent, bytes_sent, "audio frames sent");
                        }
                    }
                    None => {
                        debug!("capture stream ended");
                        break;
                    }
                },
                received = stream.next() => match received {
                    Some(Ok(Message::Binary(data))) => {
                        chunks_received += 1;
                        bytes_received += data.len() as u64;
                        bridge.ingest_playback(&data).await;
                        if chunks_received % 10 == 0 {
                            debug!(chunks_received, bytes_received, "audio chunks received");
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(message = %text, "ignoring text message on legacy stream");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            warn!(error = %e, "failed to answer ping");
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("provider closed the stream");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "websocket receive failed");
                        outcome = Err(ProviderError::Transport(e));
                        break;
                    }
                    None => {
                        debug!("websocket stream ended");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("session shutdown requested");
                    break;
                }
            }
        }

        // Close sequence runs on every exit path: the trailing playback
        // remainder must reach the bridge before the socket goes away.
        bridge.flush_playback().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "websocket close failed");
        }
        observability::provider_connection_closed("legacy");
        observability::record_provider_tokens(estimate_tokens(bytes_sent));
        info!(
            frames_sent,
            bytes_sent,
            chunks_received,
            bytes_received,
            estimated_tokens = estimate_tokens(bytes_sent),
            "legacy provider session finished"
        );
        outcome
    }
}

//! Realtime dialect: JSON events both ways with base64-coded PCM payloads
//!
//! The session opens with a `session.update` describing formats and turn
//! detection, streams microphone audio as `input_audio_buffer.append`
//! events, and plays back `response.output_audio.delta` payloads. The
//! input buffer is committed at most once per session; which trigger
//! fires first is configurable (capture end, response completion, close).

use crate::session::{
    authorized_request, connect, estimate_tokens, ProviderSession, SessionConfig, WsStream,
};
use crate::wire::{self, ClientEvent, ServerEvent};
use crate::ProviderError;
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use sip_agent_bridge::AudioBridge;
use sip_agent_core::observability;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

pub struct RealtimeSession {
    ws: WsStream,
    bridge: Arc<AudioBridge>,
    config: SessionConfig,
}

impl RealtimeSession {
    /// Connect and send the opening `session.update`
    pub(crate) async fn open(
        config: SessionConfig,
        bridge: Arc<AudioBridge>,
    ) -> Result<Self, ProviderError> {
        let url = format!(
            "{}/v1/realtime?model={}&voice={}&temperature={}",
            config.base_url, config.model, config.voice, config.temperature
        );
        let mut request = authorized_request(&url, &config.api_key)?;
        request.headers_mut().insert(
            HeaderName::from_static("openai-beta"),
            HeaderValue::from_static("realtime=v1"),
        );

        let mut ws = connect(request).await?;

        let update =
            ClientEvent::session_update(&config.model, &config.system_prompt, &config.format);
        ws.send(Message::text(serde_json::to_string(&update)?))
            .await?;

        observability::record_provider_request("realtime");
        observability::provider_connection_opened("realtime");
        info!(
            model = %config.model,
            voice = %config.voice,
            "realtime provider session opened"
        );

        Ok(Self { ws, bridge, config })
    }
}

/// Send `input_audio_buffer.commit` unless one already went out.
async fn send_commit(
    sink: &mut SplitSink<WsStream, Message>,
    committed: &mut bool,
    trigger: &'static str,
) -> Result<(), ProviderError> {
    if *committed {
        return Ok(());
    }
    let json = serde_json::to_string(&ClientEvent::commit())?;
    sink.send(Message::text(json)).await?;
    *committed = true;
    debug!(trigger, "input audio buffer committed");
    Ok(())
}

#[async_trait]
impl ProviderSession for RealtimeSession {
    fn mode(&self) -> &'static str {
        "realtime"
    }

    async fn run(
        self: Box<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProviderError> {
        let Self { ws, bridge, config } = *self;
        let (mut sink, mut stream) = ws.split();

        let mut committed = false;
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
                        let event = ClientEvent::audio_append(frame.bytes());
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                outcome = Err(ProviderError::Encode(e));
                                break;
                            }
                        };
                        if let Err(e) = sink.send(Message::text(json)).await {
                            error!(error = %e, "failed to send audio append");
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
                        if config.commit_on_send_end {
                            if let Err(e) = send_commit(&mut sink, &mut committed, "send_end").await {
                                debug!(error = %e, "commit after capture end failed");
                            }
                        }
                        break;
                    }
                },
                received = stream.next() => match received {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::OutputAudioDelta { delta }) => {
                            match wire::decode_audio_delta(&delta) {
                                Ok(pcm) => {
                                    chunks_received += 1;
                                    bytes_received += pcm.len() as u64;
                                    bridge.ingest_playback(&pcm).await;
                                    if chunks_received % 10 == 0 {
                                        debug!(chunks_received, bytes_received, "audio deltas received");
                                    }
                                }
                                Err(e) => warn!(error = %e, "undecodable audio delta, skipping"),
                            }
                        }
                        Ok(ServerEvent::TranscriptDelta { delta }) => {
                            if !delta.trim().is_empty() {
                                debug!(transcript = %delta, "transcript delta");
                            }
                        }
                        Ok(ServerEvent::ResponseCompleted) => {
                            debug!("provider response completed");
                            if config.commit_on_response_completed {
                                if let Err(e) = send_commit(&mut sink, &mut committed, "response_completed").await {
                                    error!(error = %e, "failed to send commit");
                                    outcome = Err(e);
                                    break;
                                }
                            }
                        }
                        Ok(ServerEvent::Error { error }) => {
                            error!(detail = %error, "provider error event");
                            outcome = Err(ProviderError::Server(error.to_string()));
                            break;
                        }
                        Ok(ServerEvent::Unknown) => {}
                        Err(e) => warn!(error = %e, "malformed provider event, skipping"),
                    },
                    Some(Ok(Message::Binary(_))) => {
                        debug!("ignoring binary message on realtime stream");
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
        if config.commit_on_close && !committed {
            if let Err(e) = send_commit(&mut sink, &mut committed, "close").await {
                debug!(error = %e, "commit during close failed");
            }
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "websocket close failed");
        }
        observability::provider_connection_closed("realtime");
        observability::record_provider_tokens(estimate_tokens(bytes_sent));
        info!(
            frames_sent,
            bytes_sent,
            chunks_received,
            bytes_received,
            estimated_tokens = estimate_tokens(bytes_sent),
            "realtime provider session finished"
        );
        outcome
    }
}

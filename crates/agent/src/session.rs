//! Per-call lifecycle
//!
//! ```text
//! Idle ──────────▶ Established ──▶ Draining ──▶ Terminated
//!   │                                  ▲
//!   └──▶ InviteRetryPending ───────────┘
//! ```
//!
//! A session owns the call's audio bridge and the provider task. Shutdown
//! drains queued playback before cancelling the provider, so the caller
//! hears the tail of the response; it is safe to invoke more than once.

use crate::telephony::{CallAudioPort, CallDirection, CallId};
use crate::AgentError;
use chrono::{DateTime, Utc};
use sip_agent_bridge::{AudioBridge, BridgeConfig};
use sip_agent_config::AudioConfig;
use sip_agent_core::observability::{self, CorrelationId};
use sip_agent_provider::{open_session, SessionConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

type ProviderTask = JoinHandle<Result<(), sip_agent_provider::ProviderError>>;

/// Call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Signaling in progress, no media yet
    Idle,
    /// Provider session live, audio flowing
    Established,
    /// Waiting for queued playback to finish
    Draining,
    /// Outbound INVITE rejected; another attempt is scheduled
    InviteRetryPending,
    /// Final state
    Terminated,
}

/// Call session events
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// State changed
    StateChanged { old: CallState, new: CallState },
    /// Provider session finished; `error` is set for abnormal ends
    ProviderClosed { error: Option<String> },
    /// Session reached its final state
    Terminated { reason: String },
}

/// A single call from INVITE to teardown
pub struct CallSession {
    call_id: CallId,
    direction: CallDirection,
    correlation_id: CorrelationId,
    started_at: DateTime<Utc>,
    created: Instant,
    drain_timeout: Duration,
    bridge: Arc<AudioBridge>,
    state: Arc<RwLock<CallState>>,
    event_tx: broadcast::Sender<CallEvent>,
    shutdown_tx: broadcast::Sender<()>,
    provider_task: Mutex<Option<ProviderTask>>,
    established_at: parking_lot::Mutex<Option<Instant>>,
}

impl CallSession {
    pub fn new(
        call_id: CallId,
        direction: CallDirection,
        audio: &AudioConfig,
    ) -> Result<Self, AgentError> {
        let format = audio.format()?;
        let bridge = Arc::new(AudioBridge::new(
            format,
            BridgeConfig {
                max_pending_frames: audio.max_pending_frames,
                enqueue_timeout: Duration::from_millis(audio.enqueue_timeout_ms),
                playback_poll_timeout: Duration::from_millis(audio.playback_poll_timeout_ms),
            },
        ));
        let (event_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            call_id,
            direction,
            correlation_id: CorrelationId::new(),
            started_at: Utc::now(),
            created: Instant::now(),
            drain_timeout: Duration::from_millis(audio.drain_timeout_ms),
            bridge,
            state: Arc::new(RwLock::new(CallState::Idle)),
            event_tx,
            shutdown_tx,
            provider_task: Mutex::new(None),
            established_at: parking_lot::Mutex::new(None),
        })
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Media endpoint for the telephony driver
    pub fn audio_port(&self) -> CallAudioPort {
        CallAudioPort::new(Arc::clone(&self.bridge))
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Get current state
    pub async fn state(&self) -> CallState {
        *self.state.read().await
    }

    /// Open the provider session and start driving it.
    pub async fn establish(&self, config: SessionConfig) -> Result<(), AgentError> {
        let session = open_session(config, Arc::clone(&self.bridge)).await?;
        let mode = session.mode();

        let span = info_span!(
            "provider_session",
            call_id = %self.call_id,
            correlation_id = %self.correlation_id,
            mode,
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(
            async move {
                let result = session.run(shutdown_rx).await;
                let error = result.as_ref().err().map(|e| e.to_string());
                let _ = event_tx.send(CallEvent::ProviderClosed { error });
                result
            }
            .instrument(span),
        );
        *self.provider_task.lock().await = Some(handle);
        *self.established_at.lock() = Some(Instant::now());

        observability::active_calls_inc();
        observability::record_call_setup_time(self.created.elapsed().as_secs_f64());
        self.set_state(CallState::Established).await;
        info!(
            call_id = %self.call_id,
            direction = self.direction.as_str(),
            mode,
            "call established"
        );
        Ok(())
    }

    /// Mark that another INVITE attempt is scheduled for this target.
    pub async fn mark_invite_retry(&self) {
        self.set_state(CallState::InviteRetryPending).await;
    }

    /// Drain playback, stop the provider, and finalize metrics. The result
    /// label is derived from how the session ends.
    pub async fn shutdown(&self, reason: impl Into<String>) {
        self.shutdown_with_result(reason, None).await;
    }

    /// Like [`CallSession::shutdown`], but with an explicit result label
    /// (e.g. `retry_exhausted` when redial attempts ran out).
    pub async fn shutdown_with_result(
        &self,
        reason: impl Into<String>,
        result: Option<&'static str>,
    ) {
        let reason = reason.into();
        let previous = {
            let mut state = self.state.write().await;
            let previous = *state;
            if matches!(previous, CallState::Draining | CallState::Terminated) {
                return;
            }
            *state = CallState::Draining;
            previous
        };
        let _ = self.event_tx.send(CallEvent::StateChanged {
            old: previous,
            new: CallState::Draining,
        });

        debug!(call_id = %self.call_id, reason = %reason, "draining call");
        self.bridge.stop();
        if !self.bridge.wait_for_playback_drain(self.drain_timeout).await {
            warn!(call_id = %self.call_id, "playback drain timed out");
        }
        let _ = self.shutdown_tx.send(());

        let mut provider_ok = true;
        if let Some(handle) = self.provider_task.lock().await.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    provider_ok = false;
                    warn!(call_id = %self.call_id, error = %e, "provider session ended with error");
                }
                Err(e) => {
                    provider_ok = false;
                    error!(call_id = %self.call_id, error = %e, "provider task failed");
                }
            }
        }

        self.set_state(CallState::Terminated).await;

        let established = *self.established_at.lock();
        let result = result.unwrap_or(if !provider_ok {
            "provider_error"
        } else if established.is_some() {
            "completed"
        } else {
            "failed"
        });
        observability::record_call(self.direction.as_str(), result);
        if let Some(established) = established {
            observability::record_call_duration(result, established.elapsed().as_secs_f64());
            observability::active_calls_dec();
        }
        info!(
            call_id = %self.call_id,
            direction = self.direction.as_str(),
            started_at = %self.started_at,
            duration_secs = established.map(|e| e.elapsed().as_secs_f64()).unwrap_or(0.0),
            capture_dropouts = self.bridge.capture_dropouts(),
            playback_dropouts = self.bridge.playback_dropouts(),
            result,
            reason = %reason,
            "call terminated"
        );
        let _ = self.event_tx.send(CallEvent::Terminated { reason });
    }

    /// Set state and emit event
    async fn set_state(&self, new_state: CallState) {
        let old_state = {
            let mut state = self.state.write().await;
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            let _ = self.event_tx.send(CallEvent::StateChanged {
                old: old_state,
                new: new_state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(direction: CallDirection) -> CallSession {
        let audio = AudioConfig {
            drain_timeout_ms: 100,
            playback_poll_timeout_ms: 5,
            ..AudioConfig::default()
        };
        CallSession::new(CallId::new("call-1"), direction, &audio).unwrap()
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let session = test_session(CallDirection::Inbound);
        assert_eq!(session.state().await, CallState::Idle);
        assert_eq!(session.call_id().as_str(), "call-1");
        assert_eq!(session.direction(), CallDirection::Inbound);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let session = test_session(CallDirection::Inbound);
        let mut events = session.subscribe();

        session.shutdown("caller hung up").await;
        session.shutdown("duplicate").await;
        assert_eq!(session.state().await, CallState::Terminated);

        let mut terminations = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, CallEvent::Terminated { .. }) {
                terminations += 1;
            }
        }
        assert_eq!(terminations, 1);
    }

    #[tokio::test]
    async fn test_state_changes_are_emitted() {
        let session = test_session(CallDirection::Outbound);
        let mut events = session.subscribe();

        session.mark_invite_retry().await;
        session.shutdown("invite retry scheduled").await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CallEvent::StateChanged { new, .. } = event {
                states.push(new);
            }
        }
        assert_eq!(
            states,
            vec![
                CallState::InviteRetryPending,
                CallState::Draining,
                CallState::Terminated
            ]
        );
    }

    #[tokio::test]
    async fn test_audio_port_shares_bridge() {
        let session = test_session(CallDirection::Inbound);
        let port = session.audio_port();
        assert_eq!(port.format().frame_bytes(), 640);
    }
}

//! Telephony driver seam
//!
//! The SIP stack lives behind [`TelephonyDriver`]: the engine reacts to its
//! event stream and issues answer/dial/hangup back through it. Media flows
//! through [`CallAudioPort`], the driver-facing end of a call's audio bridge.

use crate::AgentError;
use async_trait::async_trait;
use sip_agent_bridge::AudioBridge;
use sip_agent_core::audio::{AudioFormat, AudioFrame};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// SIP dialog identifier, assigned by the driver
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// Events surfaced by the SIP stack
#[derive(Debug, Clone)]
pub enum TelephonyEvent {
    /// Registrar accepted or dropped our registration
    RegistrationChanged { registered: bool, status_code: u16 },
    /// New inbound INVITE
    IncomingCall { call_id: CallId, remote_uri: String },
    /// Call reached the confirmed state (200 OK exchanged)
    CallConfirmed { call_id: CallId },
    /// Media transport is up for the call
    MediaActive { call_id: CallId },
    /// Call ended; `status_code` carries the SIP status for rejected INVITEs
    CallDisconnected {
        call_id: CallId,
        status_code: Option<u16>,
    },
}

/// The SIP stack, as the engine sees it
#[async_trait]
pub trait TelephonyDriver: Send + Sync {
    /// Register with the configured registrar; resolves with the outcome.
    async fn register(&self) -> Result<(), AgentError>;

    /// Send an INVITE to `uri` and return the new call's id.
    async fn dial(&self, uri: &str) -> Result<CallId, AgentError>;

    /// Answer an incoming call.
    async fn answer(&self, call_id: &CallId) -> Result<(), AgentError>;

    /// Tear down a call.
    async fn hangup(&self, call_id: &CallId) -> Result<(), AgentError>;

    /// Hand the driver the media endpoint for a call. The driver's media
    /// callbacks push captured frames in and pull playback frames out.
    async fn attach_media(&self, call_id: &CallId, port: CallAudioPort) -> Result<(), AgentError>;

    /// Subscribe to telephony events.
    fn events(&self) -> broadcast::Receiver<TelephonyEvent>;
}

/// Driver-facing end of a call's audio bridge.
///
/// Both directions are bounded: a full queue drops the newest frame rather
/// than stalling the media thread, and a missing playback frame becomes
/// silence. Safe to call from non-tokio threads.
#[derive(Clone)]
pub struct CallAudioPort {
    bridge: Arc<AudioBridge>,
}

impl CallAudioPort {
    pub fn new(bridge: Arc<AudioBridge>) -> Self {
        Self { bridge }
    }

    pub fn format(&self) -> &AudioFormat {
        self.bridge.format()
    }

    /// Push one captured frame toward the provider. Returns false when the
    /// frame was dropped.
    pub fn push_capture(&self, frame: AudioFrame) -> bool {
        self.bridge.push_capture(frame)
    }

    /// Next frame to play to the caller; silence when none arrived in time.
    pub fn next_playback_frame(&self) -> AudioFrame {
        self.bridge.next_playback_frame()
    }
}

impl fmt::Debug for CallAudioPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallAudioPort")
            .field("format", self.bridge.format())
            .finish()
    }
}

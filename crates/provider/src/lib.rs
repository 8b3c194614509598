//! Speech provider adapter
//!
//! Connects a call's audio bridge to the provider over WebSocket. Two wire
//! dialects are supported behind one session contract:
//!
//! - **legacy**: one JSON config message, then raw binary PCM both ways
//! - **realtime**: JSON events (`session.update`, `input_audio_buffer.append`,
//!   `response.output_audio.delta`, ...) with base64 audio payloads
//!
//! A session is opened per call and driven by a single task: capture frames
//! from the bridge go out, provider audio comes back in through the bridge's
//! playback side. Either direction ending (or a shutdown signal) ends the
//! session; the trailing playback remainder is always flushed before the
//! socket closes. Connectivity failures end the session; reconnecting is a
//! call-level decision, not a provider-level one.

pub mod factory;
pub mod legacy;
pub mod realtime;
pub mod session;
pub mod wire;

pub use factory::open_session;
pub use session::{ProviderSession, SessionConfig};

use thiserror::Error;

/// Provider session errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("provider handshake failed: {0}")]
    Handshake(String),

    #[error("failed to encode provider message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("provider reported an error: {0}")]
    Server(String),
}

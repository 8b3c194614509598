//! Call lifecycle engine: connects SIP telephony to a speech provider
//!
//! ```text
//!  TelephonyDriver ──events──▶ CallEngine ──▶ CallSession ──▶ ProviderSession
//!        ▲                        │               │
//!        └── answer/dial/hangup ──┘               └── AudioBridge (RTP ⇄ WS)
//! ```
//!
//! [`CallEngine`] owns registration and the call table: it answers inbound
//! calls, places and retries outbound ones, and tears sessions down when
//! either leg ends. Each [`CallSession`] runs one provider connection over
//! its own audio bridge.

pub mod bootstrap;
pub mod engine;
pub mod retry;
pub mod session;
pub mod telephony;

pub use bootstrap::{init_metrics, init_tracing};
pub use engine::CallEngine;
pub use retry::{
    RetryDecision, RetryPolicy, RetryScheduler, ThreadRegistrar, ThreadTimer, Timer, TokioTimer,
};
pub use session::{CallEvent, CallSession, CallState};
pub use telephony::{CallAudioPort, CallDirection, CallId, TelephonyDriver, TelephonyEvent};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Telephony error: {0}")]
    Telephony(String),

    #[error("retry limit reached")]
    RetryExhausted,

    #[error("Provider error: {0}")]
    Provider(#[from] sip_agent_provider::ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] sip_agent_config::ConfigError),

    #[error("Observability error: {0}")]
    Observability(String),
}

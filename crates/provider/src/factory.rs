//! Session construction by configured dialect

use crate::legacy::LegacySession;
use crate::realtime::RealtimeSession;
use crate::session::{ProviderSession, SessionConfig};
use crate::ProviderError;
use sip_agent_bridge::AudioBridge;
use sip_agent_config::ProviderMode;
use std::sync::Arc;

/// Connect to the provider and hand back a session ready to run.
///
/// The handshake (including the opening configuration message) completes
/// before this returns, so a returned session is known-good to drive.
pub async fn open_session(
    config: SessionConfig,
    bridge: Arc<AudioBridge>,
) -> Result<Box<dyn ProviderSession>, ProviderError> {
    match config.mode {
        ProviderMode::Legacy => Ok(Box::new(LegacySession::open(&config, bridge).await?)),
        ProviderMode::Realtime => Ok(Box::new(RealtimeSession::open(config, bridge).await?)),
    }
}

//! Configuration for the SIP voice agent
//!
//! Settings are layered: an optional `config/default` file, an optional
//! environment-specific file, then environment variables with the `SIP_AGENT`
//! prefix (`__` separates nesting levels). Validation runs at load time so a
//! bad deployment fails at startup instead of mid-call.

pub mod settings;

pub use settings::{
    load_settings, load_settings_from, AudioConfig, ObservabilityConfig, ProviderConfig,
    ProviderMode, RuntimeEnvironment, Settings, SipConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

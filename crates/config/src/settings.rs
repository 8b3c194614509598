//! Application settings with environment variable support

use crate::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sip_agent_core::audio::{AudioFormat, SampleRate};
use std::path::Path;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }
}

/// Speech provider dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Binary PCM stream with a one-shot JSON config
    #[default]
    Legacy,
    /// JSON event protocol (session.update / input_audio_buffer.append)
    Realtime,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Legacy => "legacy",
            ProviderMode::Realtime => "realtime",
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub sip: SipConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// SIP account and retry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipConfig {
    /// SIP registrar domain (required)
    #[serde(default)]
    pub domain: String,

    /// SIP account user (required)
    #[serde(default)]
    pub user: String,

    /// SIP account password (required)
    #[serde(default)]
    pub password: String,

    /// UDP/TCP transport port; 0 lets the stack pick
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,

    /// Codec priority list passed to the driver, highest first
    #[serde(default)]
    pub preferred_codecs: Vec<String>,

    #[serde(default)]
    pub stun_server: Option<String>,

    #[serde(default)]
    pub turn_server: Option<String>,

    #[serde(default)]
    pub turn_user: Option<String>,

    #[serde(default)]
    pub turn_password: Option<String>,

    #[serde(default)]
    pub ice_enabled: bool,

    #[serde(default)]
    pub srtp_enabled: bool,

    /// Registration retry backoff base (unbounded attempts)
    #[serde(default = "default_reg_retry_base_secs")]
    pub reg_retry_base_secs: f64,

    #[serde(default = "default_reg_retry_max_secs")]
    pub reg_retry_max_secs: f64,

    /// Outbound invite retry backoff base (bounded attempts)
    #[serde(default = "default_invite_retry_base_secs")]
    pub invite_retry_base_secs: f64,

    #[serde(default = "default_invite_retry_max_secs")]
    pub invite_retry_max_secs: f64,

    #[serde(default = "default_invite_max_attempts")]
    pub invite_max_attempts: u32,
}

fn default_transport_port() -> u16 {
    5060
}

fn default_reg_retry_base_secs() -> f64 {
    2.0
}

fn default_reg_retry_max_secs() -> f64 {
    60.0
}

fn default_invite_retry_base_secs() -> f64 {
    1.0
}

fn default_invite_retry_max_secs() -> f64 {
    30.0
}

fn default_invite_max_attempts() -> u32 {
    5
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            user: String::new(),
            password: String::new(),
            transport_port: default_transport_port(),
            preferred_codecs: Vec::new(),
            stun_server: None,
            turn_server: None,
            turn_user: None,
            turn_password: None,
            ice_enabled: false,
            srtp_enabled: false,
            reg_retry_base_secs: default_reg_retry_base_secs(),
            reg_retry_max_secs: default_reg_retry_max_secs(),
            invite_retry_base_secs: default_invite_retry_base_secs(),
            invite_retry_max_secs: default_invite_retry_max_secs(),
            invite_max_attempts: default_invite_max_attempts(),
        }
    }
}

/// Speech provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (required)
    #[serde(default)]
    pub api_key: String,

    /// Provider-side agent id sent in the legacy config message (required)
    #[serde(default)]
    pub agent_id: String,

    #[serde(default)]
    pub mode: ProviderMode,

    #[serde(default = "default_provider_model")]
    pub model: String,

    #[serde(default = "default_provider_voice")]
    pub voice: String,

    #[serde(default = "default_provider_temperature")]
    pub temperature: f64,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// WebSocket base URL; tests point this at a local server
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Realtime mode: commit the input buffer when the send loop ends
    #[serde(default = "default_true")]
    pub commit_on_send_end: bool,

    /// Realtime mode: commit when the provider reports a completed response
    #[serde(default = "default_true")]
    pub commit_on_response_completed: bool,

    /// Realtime mode: commit during close if nothing committed earlier
    #[serde(default = "default_true")]
    pub commit_on_close: bool,
}

fn default_provider_model() -> String {
    "gpt-realtime".to_string()
}

fn default_provider_voice() -> String {
    "alloy".to_string()
}

fn default_provider_temperature() -> f64 {
    0.3
}

fn default_system_prompt() -> String {
    "You are a helpful voice assistant.".to_string()
}

fn default_provider_base_url() -> String {
    "wss://api.openai.com".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            agent_id: String::new(),
            mode: ProviderMode::default(),
            model: default_provider_model(),
            voice: default_provider_voice(),
            temperature: default_provider_temperature(),
            system_prompt: default_system_prompt(),
            base_url: default_provider_base_url(),
            commit_on_send_end: true,
            commit_on_response_completed: true,
            commit_on_close: true,
        }
    }
}

/// Audio stream shape and bridge tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Queue capacity per direction
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,

    /// How long a producer waits for queue space before dropping the frame
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// How long the playback consumer waits before substituting silence
    #[serde(default = "default_playback_poll_timeout_ms")]
    pub playback_poll_timeout_ms: u64,

    /// Upper bound on waiting for queued playback to finish at teardown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frame_duration_ms() -> u32 {
    20
}

fn default_channels() -> u16 {
    1
}

fn default_max_pending_frames() -> usize {
    50
}

fn default_enqueue_timeout_ms() -> u64 {
    100
}

fn default_playback_poll_timeout_ms() -> u64 {
    20
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_duration_ms: default_frame_duration_ms(),
            channels: default_channels(),
            max_pending_frames: default_max_pending_frames(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            playback_poll_timeout_ms: default_playback_poll_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl AudioConfig {
    /// Resolve the configured stream shape into a typed format
    pub fn format(&self) -> Result<AudioFormat, ConfigError> {
        let rate =
            SampleRate::from_u32(self.sample_rate).ok_or_else(|| ConfigError::InvalidValue {
                field: "audio.sample_rate".to_string(),
                message: format!("unsupported sample rate: {}", self.sample_rate),
            })?;
        Ok(AudioFormat::new(rate, self.frame_duration_ms, self.channels))
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Settings {
    /// Validate all settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_sip()?;
        self.validate_provider()?;
        self.validate_audio()?;
        self.validate_observability()?;
        Ok(())
    }

    fn validate_sip(&self) -> Result<(), ConfigError> {
        if self.sip.domain.trim().is_empty() {
            return Err(ConfigError::MissingField("sip.domain".to_string()));
        }
        if self.sip.user.trim().is_empty() {
            return Err(ConfigError::MissingField("sip.user".to_string()));
        }
        if self.sip.password.trim().is_empty() {
            return Err(ConfigError::MissingField("sip.password".to_string()));
        }

        if self.sip.reg_retry_base_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "sip.reg_retry_base_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.sip.reg_retry_max_secs < self.sip.reg_retry_base_secs {
            return Err(ConfigError::InvalidValue {
                field: "sip.reg_retry_max_secs".to_string(),
                message: "must be >= reg_retry_base_secs".to_string(),
            });
        }
        if self.sip.invite_retry_base_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "sip.invite_retry_base_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.sip.invite_retry_max_secs < self.sip.invite_retry_base_secs {
            return Err(ConfigError::InvalidValue {
                field: "sip.invite_retry_max_secs".to_string(),
                message: "must be >= invite_retry_base_secs".to_string(),
            });
        }
        if self.sip.invite_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sip.invite_max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_provider(&self) -> Result<(), ConfigError> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("provider.api_key".to_string()));
        }
        if self.provider.agent_id.trim().is_empty() {
            return Err(ConfigError::MissingField("provider.agent_id".to_string()));
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "provider.temperature".to_string(),
                message: format!(
                    "must be between 0.0 and 2.0, got {}",
                    self.provider.temperature
                ),
            });
        }

        let url = &self.provider.base_url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "provider.base_url".to_string(),
                message: "must start with ws:// or wss://".to_string(),
            });
        }
        // Plaintext provider links are a dev/test convenience only
        if self.environment.is_production() && !url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "provider.base_url".to_string(),
                message: "production requires wss://".to_string(),
            });
        }
        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        self.audio.format()?;

        if self.audio.frame_duration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.frame_duration_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.audio.channels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.channels".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.audio.max_pending_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.max_pending_frames".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_observability(&self) -> Result<(), ConfigError> {
        if self.observability.metrics_enabled && self.observability.metrics_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "observability.metrics_port".to_string(),
                message: "must be nonzero when metrics are enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Strip required strings and collapse blank optionals to `None`.
    ///
    /// Environment variables set to an empty string should behave like unset
    /// ones for the optional NAT fields.
    fn normalize(&mut self) {
        self.sip.domain = self.sip.domain.trim().to_string();
        self.sip.user = self.sip.user.trim().to_string();
        self.sip.password = self.sip.password.trim().to_string();
        self.provider.api_key = self.provider.api_key.trim().to_string();
        self.provider.agent_id = self.provider.agent_id.trim().to_string();

        for field in [
            &mut self.sip.stun_server,
            &mut self.sip.turn_server,
            &mut self.sip.turn_user,
            &mut self.sip.turn_password,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (SIP_AGENT_ prefix)
/// 2. config/{env} (if env specified)
/// 3. config/default
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory.
pub fn load_settings_from(config_dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::from(config_dir.join("default")).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder = builder.add_source(File::from(config_dir.join(env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("SIP_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    settings.normalize();
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.sip.domain = "sip.example.com".to_string();
        settings.sip.user = "agent".to_string();
        settings.sip.password = "secret".to_string();
        settings.provider.api_key = "test-key".to_string();
        settings.provider.agent_id = "agent-1".to_string();
        settings
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.sip.transport_port, 5060);
        assert_eq!(settings.sip.invite_max_attempts, 5);
        assert_eq!(settings.provider.mode, ProviderMode::Legacy);
        assert_eq!(settings.provider.model, "gpt-realtime");
        assert_eq!(settings.provider.voice, "alloy");
        assert_eq!(settings.audio.sample_rate, 16000);
        assert_eq!(settings.audio.max_pending_frames, 50);
        assert_eq!(settings.observability.metrics_port, 9090);
        assert!(settings.provider.commit_on_close);
    }

    #[test]
    fn test_required_fields() {
        let settings = Settings::default();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(_))
        ));

        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn test_temperature_bounds() {
        let mut settings = valid_settings();

        settings.provider.temperature = 2.5;
        assert!(settings.validate().is_err());

        settings.provider.temperature = -0.1;
        assert!(settings.validate().is_err());

        settings.provider.temperature = 0.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_base_url_scheme() {
        let mut settings = valid_settings();

        settings.provider.base_url = "https://api.openai.com".to_string();
        assert!(settings.validate().is_err());

        settings.provider.base_url = "ws://127.0.0.1:9000".to_string();
        assert!(settings.validate().is_ok());

        // Plaintext is rejected in production
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());

        settings.provider.base_url = "wss://api.openai.com".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_sample_rate_must_be_supported() {
        let mut settings = valid_settings();

        settings.audio.sample_rate = 11025;
        assert!(settings.validate().is_err());

        settings.audio.sample_rate = 48000;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_audio_format_conversion() {
        let settings = valid_settings();
        let format = settings.audio.format().unwrap();
        assert_eq!(format.frame_bytes(), 640);
    }

    #[test]
    fn test_retry_tuning_validation() {
        let mut settings = valid_settings();

        settings.sip.reg_retry_base_secs = 0.0;
        assert!(settings.validate().is_err());
        settings.sip.reg_retry_base_secs = 2.0;

        settings.sip.reg_retry_max_secs = 1.0;
        assert!(settings.validate().is_err());
        settings.sip.reg_retry_max_secs = 60.0;

        settings.sip.invite_max_attempts = 0;
        assert!(settings.validate().is_err());
        settings.sip.invite_max_attempts = 5;

        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_metrics_port_validation() {
        let mut settings = valid_settings();

        settings.observability.metrics_port = 0;
        assert!(settings.validate().is_err());

        settings.observability.metrics_enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_normalize_blank_optionals() {
        let mut settings = valid_settings();
        settings.sip.stun_server = Some("  ".to_string());
        settings.sip.turn_server = Some("turn.example.com:3478".to_string());
        settings.sip.domain = " sip.example.com ".to_string();

        settings.normalize();

        assert_eq!(settings.sip.stun_server, None);
        assert_eq!(
            settings.sip.turn_server.as_deref(),
            Some("turn.example.com:3478")
        );
        assert_eq!(settings.sip.domain, "sip.example.com");
    }

    #[test]
    fn test_load_settings_layers_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[sip]
domain = "sip.example.com"
user = "agent"
password = "secret"

[provider]
api_key = "file-key"
agent_id = "agent-9"
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("production.toml"),
            r#"
environment = "production"

[sip]
transport_port = 5070
"#,
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), Some("production")).unwrap();
        assert_eq!(settings.environment, RuntimeEnvironment::Production);
        // production file overrides the port, default file still supplies the rest
        assert_eq!(settings.sip.transport_port, 5070);
        assert_eq!(settings.sip.domain, "sip.example.com");
        assert_eq!(settings.provider.api_key, "file-key");
        assert_eq!(settings.provider.model, "gpt-realtime");
    }

    #[test]
    fn test_load_settings_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[sip]
domain = "sip.example.com"
user = "agent"
password = "secret"

[provider]
api_key = "file-key"
agent_id = "agent-9"
temperature = 9.5
"#,
        )
        .unwrap();

        let err = load_settings_from(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "provider.temperature"));
    }
}

//! Wire formats for both provider dialects
//!
//! Field names and event type strings here are the provider's contract; the
//! dotted event names require explicit renames rather than a container-level
//! rename rule.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sip_agent_core::audio::AudioFormat;

/// One-shot configuration message opening a legacy session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    pub agent_id: String,
    pub sample_rate: u32,
    pub encoding: String,
    pub audio_channels: u16,
}

impl LegacyConfig {
    pub fn new(agent_id: &str, format: &AudioFormat) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            sample_rate: format.sample_rate.as_u32(),
            encoding: "linear16".to_string(),
            audio_channels: format.channels,
        }
    }
}

/// Events sent to the realtime endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: RealtimeSessionBody },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,
}

impl ClientEvent {
    /// Build the `session.update` handshake event
    pub fn session_update(model: &str, instructions: &str, format: &AudioFormat) -> Self {
        ClientEvent::SessionUpdate {
            session: RealtimeSessionBody {
                kind: "realtime".to_string(),
                model: model.to_string(),
                output_modalities: vec!["audio".to_string()],
                audio: RealtimeAudioConfig {
                    input: RealtimeAudioInput {
                        format: PcmFormat::new(format),
                        turn_detection: TurnDetection {
                            kind: "server_vad".to_string(),
                        },
                    },
                    output: RealtimeAudioOutput {
                        format: PcmFormat::new(format),
                    },
                },
                instructions: instructions.to_string(),
            },
        }
    }

    /// Wrap one PCM frame as a base64 append event
    pub fn audio_append(pcm: &[u8]) -> Self {
        ClientEvent::InputAudioAppend {
            audio: BASE64.encode(pcm),
        }
    }

    pub fn commit() -> Self {
        ClientEvent::InputAudioCommit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSessionBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub output_modalities: Vec<String>,
    pub audio: RealtimeAudioConfig,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeAudioConfig {
    pub input: RealtimeAudioInput,
    pub output: RealtimeAudioOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeAudioInput {
    pub format: PcmFormat,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeAudioOutput {
    pub format: PcmFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcmFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub sample_rate: u32,
}

impl PcmFormat {
    fn new(format: &AudioFormat) -> Self {
        Self {
            kind: "audio/pcm16".to_string(),
            sample_rate: format.sample_rate.as_u32(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Events received from the realtime endpoint.
///
/// Unlisted event types map to `Unknown` so new provider events never break
/// the receive loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.output_audio.delta")]
    OutputAudioDelta { delta: String },

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    #[serde(rename = "response.completed")]
    ResponseCompleted,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{code}: {message}"),
            (None, Some(message)) => f.write_str(message),
            (Some(code), None) => f.write_str(code),
            (None, None) => f.write_str("unspecified provider error"),
        }
    }
}

/// Decode the base64 payload of an audio delta
pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(delta)
}

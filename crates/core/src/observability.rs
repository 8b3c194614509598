//! Correlation ids and metric recording helpers
//!
//! Every per-call log line carries a correlation id so a single call can be
//! traced across the SIP driver, the bridge, and the provider session. Metric
//! names are declared once here so all crates record against the same catalog
//! the Prometheus exporter serves.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-call identifier threaded through logs and events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

const SIP_REGISTRATION_STATUS: &str = "sip_registration_status";
const SIP_REGISTRATION_ATTEMPTS: &str = "sip_registration_attempts_total";
const SIP_REGISTRATION_DURATION: &str = "sip_registration_duration_seconds";
const SIP_CALLS: &str = "sip_calls_total";
const SIP_CALL_DURATION: &str = "sip_call_duration_seconds";
const CALL_SETUP_TIME: &str = "call_setup_time_seconds";
const ACTIVE_CALLS: &str = "active_calls";
const AUDIO_FRAMES_PROCESSED: &str = "audio_frames_processed_total";
const AUDIO_DROPOUTS: &str = "audio_dropouts_total";
const PROVIDER_REQUESTS: &str = "provider_requests_total";
const PROVIDER_TOKENS_USED: &str = "provider_tokens_used_total";
const PROVIDER_WS_CONNECTIONS: &str = "provider_websocket_connections";

/// Register help text for the full metric catalog.
///
/// Called once by the metrics bootstrap after the exporter is installed.
pub fn describe_metrics() {
    describe_gauge!(
        SIP_REGISTRATION_STATUS,
        "SIP registration status (1=registered, 0=unregistered)"
    );
    describe_counter!(SIP_REGISTRATION_ATTEMPTS, "Total SIP registration attempts");
    describe_histogram!(
        SIP_REGISTRATION_DURATION,
        "Time spent completing SIP registration"
    );
    describe_counter!(SIP_CALLS, "Total SIP calls by direction and result");
    describe_histogram!(SIP_CALL_DURATION, "Call duration in seconds");
    describe_histogram!(
        CALL_SETUP_TIME,
        "Time from call arrival to media establishment"
    );
    describe_gauge!(ACTIVE_CALLS, "Number of currently active calls");
    describe_counter!(
        AUDIO_FRAMES_PROCESSED,
        "Audio frames moved through the bridge"
    );
    describe_counter!(AUDIO_DROPOUTS, "Audio frames dropped on full queues");
    describe_counter!(PROVIDER_REQUESTS, "Provider sessions opened");
    describe_counter!(
        PROVIDER_TOKENS_USED,
        "Approximate provider tokens consumed (outbound audio bytes / 1000)"
    );
    describe_gauge!(
        PROVIDER_WS_CONNECTIONS,
        "Currently open provider WebSocket connections"
    );
}

pub fn record_registration_status(registered: bool) {
    gauge!(SIP_REGISTRATION_STATUS).set(if registered { 1.0 } else { 0.0 });
}

pub fn record_registration_attempt(result: &'static str) {
    counter!(SIP_REGISTRATION_ATTEMPTS, "result" => result).increment(1);
}

pub fn record_registration_duration(seconds: f64) {
    histogram!(SIP_REGISTRATION_DURATION).record(seconds);
}

pub fn record_call(direction: &'static str, result: &'static str) {
    counter!(SIP_CALLS, "direction" => direction, "result" => result).increment(1);
}

pub fn record_call_duration(result: &'static str, seconds: f64) {
    histogram!(SIP_CALL_DURATION, "result" => result).record(seconds);
}

pub fn record_call_setup_time(seconds: f64) {
    histogram!(CALL_SETUP_TIME).record(seconds);
}

pub fn active_calls_inc() {
    gauge!(ACTIVE_CALLS).increment(1.0);
}

pub fn active_calls_dec() {
    gauge!(ACTIVE_CALLS).decrement(1.0);
}

pub fn record_frames_processed(direction: &'static str, count: u64) {
    counter!(AUDIO_FRAMES_PROCESSED, "direction" => direction).increment(count);
}

pub fn record_dropout(direction: &'static str, reason: &'static str) {
    counter!(AUDIO_DROPOUTS, "direction" => direction, "reason" => reason).increment(1);
}

pub fn record_provider_request(mode: &'static str) {
    counter!(PROVIDER_REQUESTS, "mode" => mode).increment(1);
}

pub fn record_provider_tokens(count: u64) {
    counter!(PROVIDER_TOKENS_USED).increment(count);
}

pub fn provider_connection_opened(mode: &'static str) {
    gauge!(PROVIDER_WS_CONNECTIONS, "mode" => mode).increment(1.0);
}

pub fn provider_connection_closed(mode: &'static str) {
    gauge!(PROVIDER_WS_CONNECTIONS, "mode" => mode).decrement(1.0);
}

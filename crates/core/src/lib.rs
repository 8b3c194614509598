//! Core types for the SIP voice agent
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Fixed-size PCM16 audio frames and the chunk-to-frame buffer
//! - Correlation ids for per-call log and metric tagging
//! - Metric recording helpers (Prometheus names live here, in one place)

pub mod audio;
pub mod observability;

pub use audio::{AudioError, AudioFormat, AudioFrame, FrameBuffer, SampleRate};
pub use observability::CorrelationId;

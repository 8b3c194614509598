//! Audio bridge between the SIP media thread and the provider workers
//!
//! The SIP stack delivers and consumes audio on its own real-time thread; the
//! provider session runs on tokio tasks. The bridge sits between them with one
//! bounded queue per direction:
//!
//! ```text
//!   SIP media thread (sync)                        tokio tasks (async)
//!   ───────────────────────                        ───────────────────
//!   push_capture ───► [capture queue] ───► next_capture_frame ───► send loop
//!   next_playback_frame ◄─── [playback queue] ◄─── ingest_playback ◄─── receive loop
//! ```
//!
//! Both queues apply the same backpressure rule: a producer waits briefly for
//! space, then drops the frame it is holding (never older queued audio) and
//! counts a dropout. The playback consumer substitutes silence when nothing is
//! queued so the media thread is never starved.

mod bridge;

pub use bridge::{AudioBridge, BridgeConfig, MAX_PENDING_FRAMES};

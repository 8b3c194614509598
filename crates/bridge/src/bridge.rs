//! Bounded two-directional frame conduit

use parking_lot::Mutex;
use sip_agent_core::audio::{AudioFormat, AudioFrame, FrameBuffer};
use sip_agent_core::observability;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Default queue capacity per direction
pub const MAX_PENDING_FRAMES: usize = 50;

/// Polling granularity for the synchronous queue operations
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polling granularity for the async drain wait
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bridge tuning knobs
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Queue capacity per direction
    pub max_pending_frames: usize,
    /// How long a producer waits for queue space before dropping its frame
    pub enqueue_timeout: Duration,
    /// How long the playback consumer waits before substituting silence
    pub playback_poll_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: MAX_PENDING_FRAMES,
            enqueue_timeout: Duration::from_millis(100),
            playback_poll_timeout: Duration::from_millis(20),
        }
    }
}

/// Two bounded frame queues plus the playback reassembly buffer.
///
/// Capture flows SIP → provider, playback flows provider → SIP. The SIP side
/// uses the synchronous operations (`push_capture`, `next_playback_frame`);
/// the provider workers use the async ones. `stop` is idempotent and wakes
/// any blocked consumer with an end-of-stream marker.
pub struct AudioBridge {
    format: AudioFormat,
    enqueue_timeout: Duration,
    playback_poll_timeout: Duration,

    capture_tx: mpsc::Sender<AudioFrame>,
    capture_rx: tokio::sync::Mutex<mpsc::Receiver<AudioFrame>>,
    capture_notify: Notify,

    playback_tx: mpsc::Sender<AudioFrame>,
    playback_rx: Mutex<mpsc::Receiver<AudioFrame>>,
    playback_buffer: Mutex<FrameBuffer>,

    stopped: AtomicBool,
    capture_drops: AtomicU64,
    playback_drops: AtomicU64,
}

impl AudioBridge {
    pub fn new(format: AudioFormat, config: BridgeConfig) -> Self {
        let (capture_tx, capture_rx) = mpsc::channel(config.max_pending_frames);
        let (playback_tx, playback_rx) = mpsc::channel(config.max_pending_frames);

        Self {
            format,
            enqueue_timeout: config.enqueue_timeout,
            playback_poll_timeout: config.playback_poll_timeout,
            capture_tx,
            capture_rx: tokio::sync::Mutex::new(capture_rx),
            capture_notify: Notify::new(),
            playback_tx,
            playback_rx: Mutex::new(playback_rx),
            playback_buffer: Mutex::new(FrameBuffer::new(format)),
            stopped: AtomicBool::new(false),
            capture_drops: AtomicU64::new(0),
            playback_drops: AtomicU64::new(0),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn capture_dropouts(&self) -> u64 {
        self.capture_drops.load(Ordering::SeqCst)
    }

    pub fn playback_dropouts(&self) -> u64 {
        self.playback_drops.load(Ordering::SeqCst)
    }

    /// Enqueue a captured frame from the SIP media thread.
    ///
    /// Waits up to the enqueue timeout for space. On a persistently full queue
    /// the frame being pushed is dropped (queued older audio is kept) and a
    /// dropout is counted. Returns whether the frame was accepted.
    pub fn push_capture(&self, frame: AudioFrame) -> bool {
        if self.is_stopped() {
            return false;
        }

        let deadline = Instant::now() + self.enqueue_timeout;
        let mut frame = frame;
        loop {
            match self.capture_tx.try_send(frame) {
                Ok(()) => {
                    observability::record_frames_processed("capture", 1);
                    return true;
                }
                Err(TrySendError::Full(rejected)) => {
                    if Instant::now() >= deadline {
                        self.capture_drops.fetch_add(1, Ordering::SeqCst);
                        observability::record_dropout("capture", "queue_full");
                        debug!(dropouts = self.capture_dropouts(), "capture queue full, dropping frame");
                        return false;
                    }
                    frame = rejected;
                    std::thread::sleep(SYNC_POLL_INTERVAL);
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
    }

    /// Await the next captured frame.
    ///
    /// Frames accepted before `stop` are still delivered; `None` means the
    /// bridge is stopped and the queue is drained.
    pub async fn next_capture_frame(&self) -> Option<AudioFrame> {
        let mut rx = self.capture_rx.lock().await;
        loop {
            match rx.try_recv() {
                Ok(frame) if frame.is_end_of_stream() => return None,
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Empty) => {
                    if self.is_stopped() {
                        return None;
                    }
                }
                Err(TryRecvError::Disconnected) => return None,
            }

            tokio::select! {
                _ = self.capture_notify.notified() => {}
                received = rx.recv() => match received {
                    Some(frame) if frame.is_end_of_stream() => return None,
                    Some(frame) => return Some(frame),
                    None => return None,
                },
            }
        }
    }

    /// Enqueue one playback frame from the provider receive worker.
    ///
    /// Same bounded semantics as `push_capture`: the newest frame loses.
    pub async fn push_playback(&self, frame: AudioFrame) -> bool {
        if self.is_stopped() {
            return false;
        }

        match tokio::time::timeout(self.enqueue_timeout, self.playback_tx.send(frame)).await {
            Ok(Ok(())) => {
                observability::record_frames_processed("playback", 1);
                true
            }
            Ok(Err(_)) => false,
            Err(_) => {
                self.playback_drops.fetch_add(1, Ordering::SeqCst);
                observability::record_dropout("playback", "queue_full");
                debug!(dropouts = self.playback_dropouts(), "playback queue full, dropping frame");
                false
            }
        }
    }

    /// Feed raw provider bytes through the playback frame buffer.
    ///
    /// Every completed frame is enqueued; the trailing partial stays buffered
    /// until more bytes arrive or `flush_playback` runs.
    pub async fn ingest_playback(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let frames = self.playback_buffer.lock().append(chunk);
        for frame in frames {
            self.push_playback(frame).await;
        }
    }

    /// Emit the buffered playback remainder as one final padded frame.
    ///
    /// No-op when nothing is buffered or the bridge is already stopped.
    pub async fn flush_playback(&self) {
        if self.is_stopped() {
            return;
        }
        let frame = {
            let mut buffer = self.playback_buffer.lock();
            if buffer.is_empty() {
                return;
            }
            buffer.normalize()
        };
        trace!("flushing trailing playback remainder");
        self.push_playback(frame).await;
    }

    /// Dequeue one playback frame for the SIP media thread.
    ///
    /// Waits up to the playback poll timeout, then substitutes silence; the
    /// media thread always gets a playable frame. End-of-stream markers also
    /// surface as silence.
    pub fn next_playback_frame(&self) -> AudioFrame {
        let deadline = Instant::now() + self.playback_poll_timeout;
        let mut rx = self.playback_rx.lock();
        loop {
            match rx.try_recv() {
                Ok(frame) if frame.is_end_of_stream() => return AudioFrame::silence(&self.format),
                Ok(frame) => return frame,
                Err(TryRecvError::Empty) => {
                    if self.is_stopped() || Instant::now() >= deadline {
                        return AudioFrame::silence(&self.format);
                    }
                    std::thread::sleep(SYNC_POLL_INTERVAL);
                }
                Err(TryRecvError::Disconnected) => return AudioFrame::silence(&self.format),
            }
        }
    }

    /// Wait until queued playback has been consumed, bounded by `max_wait`.
    ///
    /// Returns whether the queue emptied in time.
    pub async fn wait_for_playback_drain(&self, max_wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if self.playback_tx.capacity() == self.playback_tx.max_capacity() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Stop both directions. Idempotent.
    ///
    /// Producers are rejected from here on; an end-of-stream marker is pushed
    /// into each queue (best effort when full) so blocked consumers wake.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.capture_tx.try_send(AudioFrame::end_of_stream());
        let _ = self.playback_tx.try_send(AudioFrame::end_of_stream());
        self.capture_notify.notify_one();
        debug!(
            capture_dropouts = self.capture_dropouts(),
            playback_dropouts = self.playback_dropouts(),
            "audio bridge stopped"
        );
    }
}

//! Audio frame types and utilities
//!
//! All call audio is 16-bit little-endian PCM. A frame is a fixed-duration
//! slice of the stream (640 bytes at the default 16kHz / 20ms / mono);
//! [`FrameBuffer`] turns arbitrarily-sized byte chunks into exact frames.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Look up a supported rate by its numeric value
    pub fn from_u32(rate: u32) -> Option<Self> {
        match rate {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Errors from audio frame construction
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio frame must be exactly {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}

/// PCM stream shape: rate, frame duration, and channel count.
///
/// Determines the exact byte size of every frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    pub frame_duration_ms: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            frame_duration_ms: 20,
            channels: 1,
        }
    }
}

impl AudioFormat {
    /// 16-bit PCM
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: SampleRate, frame_duration_ms: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            frame_duration_ms,
            channels,
        }
    }

    /// Samples in one frame across all channels
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate.as_u32() as usize * self.frame_duration_ms as usize / 1000)
            * self.channels as usize
    }

    /// Exact byte size of one frame
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * Self::BYTES_PER_SAMPLE
    }
}

/// One fixed-size frame of PCM16LE audio.
///
/// Constructed only through the validating/normalizing paths, so holders can
/// rely on the length matching the stream format. The empty frame is reserved
/// as an in-band end-of-stream marker.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("len", &self.data.len())
            .field("end_of_stream", &self.data.is_empty())
            .finish()
    }
}

impl AudioFrame {
    /// Wrap PCM16 bytes, enforcing the exact frame length
    pub fn from_pcm16(data: Vec<u8>, format: &AudioFormat) -> Result<Self, AudioError> {
        let expected = format.frame_bytes();
        if data.len() != expected {
            return Err(AudioError::FrameLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// All-zero frame of the format's exact size
    pub fn silence(format: &AudioFormat) -> Self {
        Self {
            data: vec![0u8; format.frame_bytes()],
        }
    }

    /// Empty marker frame used to wake blocked queue consumers
    pub fn end_of_stream() -> Self {
        Self { data: Vec::new() }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Accumulates PCM byte chunks and emits exact frames.
///
/// Provider audio arrives in whatever chunk sizes the network produced; the
/// buffer slices full frames off the front and keeps the remainder (always
/// shorter than one frame) for the next chunk.
#[derive(Debug)]
pub struct FrameBuffer {
    format: AudioFormat,
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            pending: Vec::with_capacity(format.frame_bytes()),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Append a chunk and slice off every full frame, oldest first.
    ///
    /// Byte order is preserved across calls; the trailing partial frame stays
    /// buffered.
    pub fn append(&mut self, chunk: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(chunk);

        let frame_bytes = self.format.frame_bytes();
        let mut frames = Vec::with_capacity(self.pending.len() / frame_bytes);
        while self.pending.len() >= frame_bytes {
            let rest = self.pending.split_off(frame_bytes);
            let data = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame { data });
        }
        frames
    }

    /// Drain the remainder into exactly one frame. Never fails.
    ///
    /// Empty buffer yields silence; a short remainder is zero-padded on the
    /// right; anything over one frame (unreachable via `append`, but guarded)
    /// is truncated.
    pub fn normalize(&mut self) -> AudioFrame {
        let frame_bytes = self.format.frame_bytes();
        let mut data = std::mem::take(&mut self.pending);
        match data.len().cmp(&frame_bytes) {
            Ordering::Equal => {}
            Ordering::Less => data.resize(frame_bytes, 0),
            Ordering::Greater => data.truncate(frame_bytes),
        }
        AudioFrame { data }
    }

    /// Bytes currently buffered (always < one frame after `append`)
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_default_format() {
        let format = AudioFormat::default();
        assert_eq!(format.samples_per_frame(), 320);
        assert_eq!(format.frame_bytes(), 640);
    }

    #[test]
    fn test_frame_bytes_telephony_rate() {
        let format = AudioFormat::new(SampleRate::Hz8000, 20, 1);
        assert_eq!(format.frame_bytes(), 320);
    }

    #[test]
    fn test_sample_rate_lookup() {
        assert_eq!(SampleRate::from_u32(16000), Some(SampleRate::Hz16000));
        assert_eq!(SampleRate::from_u32(44100), Some(SampleRate::Hz44100));
        assert_eq!(SampleRate::from_u32(11025), None);
    }

    #[test]
    fn test_frame_length_enforced() {
        let format = AudioFormat::default();
        assert!(AudioFrame::from_pcm16(vec![0u8; 640], &format).is_ok());
        let err = AudioFrame::from_pcm16(vec![0u8; 639], &format);
        assert!(matches!(
            err,
            Err(AudioError::FrameLength {
                expected: 640,
                actual: 639
            })
        ));
    }

    #[test]
    fn test_silence_and_end_of_stream() {
        let format = AudioFormat::default();
        let silence = AudioFrame::silence(&format);
        assert_eq!(silence.len(), 640);
        assert!(silence.bytes().iter().all(|&b| b == 0));
        assert!(!silence.is_end_of_stream());

        let eos = AudioFrame::end_of_stream();
        assert!(eos.is_end_of_stream());
        assert_eq!(eos.len(), 0);
    }

    #[test]
    fn test_append_keeps_partial_remainder() {
        let mut buffer = FrameBuffer::new(AudioFormat::default());
        let frames = buffer.append(&[1u8; 639]);
        assert!(frames.is_empty());
        assert_eq!(buffer.pending_bytes(), 639);

        let frames = buffer.append(&[1u8; 2]);
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.pending_bytes(), 1);
    }

    #[test]
    fn test_append_slices_oldest_first() {
        let format = AudioFormat::new(SampleRate::Hz8000, 20, 1); // 320-byte frames
        let mut buffer = FrameBuffer::new(format);

        let mut chunk = vec![0xAAu8; 320];
        chunk.extend_from_slice(&[0xBBu8; 320]);
        chunk.extend_from_slice(&[0xCCu8; 100]);

        let frames = buffer.append(&chunk);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].bytes().iter().all(|&b| b == 0xAA));
        assert!(frames[1].bytes().iter().all(|&b| b == 0xBB));
        assert_eq!(buffer.pending_bytes(), 100);
    }

    #[test]
    fn test_append_preserves_order_across_calls() {
        let format = AudioFormat::new(SampleRate::Hz8000, 20, 1);
        let mut buffer = FrameBuffer::new(format);

        buffer.append(&[0x11u8; 300]);
        let frames = buffer.append(&[0x22u8; 340]);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].bytes()[..300], &[0x11u8; 300][..]);
        assert_eq!(&frames[0].bytes()[300..], &[0x22u8; 20][..]);
        assert!(frames[1].bytes().iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_append_empty_chunk() {
        let mut buffer = FrameBuffer::new(AudioFormat::default());
        assert!(buffer.append(&[]).is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_normalize_empty_is_silence() {
        let mut buffer = FrameBuffer::new(AudioFormat::default());
        let frame = buffer.normalize();
        assert_eq!(frame.len(), 640);
        assert!(frame.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_normalize_pads_short_remainder() {
        let mut buffer = FrameBuffer::new(AudioFormat::default());
        buffer.append(&[0x7Fu8; 100]);
        let frame = buffer.normalize();
        assert_eq!(frame.len(), 640);
        assert_eq!(&frame.bytes()[..100], &[0x7Fu8; 100][..]);
        assert!(frame.bytes()[100..].iter().all(|&b| b == 0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_normalize_truncates_overfull_buffer() {
        let mut buffer = FrameBuffer::new(AudioFormat::default());
        buffer.pending = vec![0x01u8; 700];
        let frame = buffer.normalize();
        assert_eq!(frame.len(), 640);
        assert!(buffer.is_empty());
    }
}

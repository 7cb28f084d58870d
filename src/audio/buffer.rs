//! Bounded per-session PCM buffer.
//!
//! Samples are addressed by absolute position since the start of the
//! stream, so snapshot boundaries (utterance start, tail window) stay valid
//! while old audio is evicted from the front.

use std::collections::VecDeque;
use std::sync::Arc;

/// Immutable copy of a buffer window taken at enqueue time.
///
/// Cloning is cheap: the samples are shared.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSnapshot {
    pub samples: Arc<[i16]>,
    /// Absolute position of `samples[0]` in the stream.
    pub start_sample: u64,
    pub sample_rate: u32,
}

impl AudioSnapshot {
    pub fn new(samples: Vec<i16>, start_sample: u64, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            start_sample,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Absolute position one past the last sample.
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.samples.len() as u64
    }

    /// Stream-relative start time in seconds.
    pub fn t0(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate as f64
    }

    /// Stream-relative end time in seconds.
    pub fn t1(&self) -> f64 {
        self.end_sample() as f64 / self.sample_rate as f64
    }

    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len() as u64, self.sample_rate)
    }
}

/// Convert a sample count to whole milliseconds.
pub fn samples_to_ms(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples * 1000 / sample_rate as u64
}

/// Convert milliseconds to a sample count.
pub fn ms_to_samples(ms: u64, sample_rate: u32) -> u64 {
    ms * sample_rate as u64 / 1000
}

/// Convert seconds to a sample count, rounding down.
pub fn seconds_to_samples(seconds: f32, sample_rate: u32) -> u64 {
    (seconds.max(0.0) as f64 * sample_rate as f64) as u64
}

/// Bounded ordered PCM buffer with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: VecDeque<i16>,
    /// Absolute position of the front sample.
    start: u64,
    capacity: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer holding at most `max_seconds` of audio.
    pub fn new(sample_rate: u32, max_seconds: f32) -> Self {
        let capacity = seconds_to_samples(max_seconds, sample_rate).max(1) as usize;
        Self {
            samples: VecDeque::with_capacity(capacity.min(1 << 20)),
            start: 0,
            capacity,
            sample_rate,
        }
    }

    /// Append samples, evicting the oldest on overflow.
    ///
    /// Returns the number of samples evicted.
    pub fn push(&mut self, frame: &[i16]) -> usize {
        self.samples.extend(frame.iter().copied());
        let overflow = self.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
            self.start += overflow as u64;
        }
        overflow
    }

    /// Absolute position of the oldest retained sample.
    pub fn oldest(&self) -> u64 {
        self.start
    }

    /// Absolute position one past the newest sample.
    pub fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Snapshot of everything from absolute position `from` to the end.
    ///
    /// Positions already evicted are clamped to the oldest retained sample.
    pub fn window(&self, from: u64) -> AudioSnapshot {
        let from = from.clamp(self.start, self.end());
        let offset = (from - self.start) as usize;
        let samples: Vec<i16> = self.samples.range(offset..).copied().collect();
        AudioSnapshot::new(samples, from, self.sample_rate)
    }

    /// Snapshot from `from` to the end, bounded to the last `max_samples`.
    pub fn tail_from(&self, from: u64, max_samples: u64) -> AudioSnapshot {
        let floor = self.end().saturating_sub(max_samples);
        self.window(from.max(floor))
    }
}

/// Re-chunks arbitrary-length inbound audio into fixed VAD frames.
///
/// A trailing partial frame is carried over to the next push.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_len = ms_to_samples(frame_ms as u64, sample_rate).max(1) as usize;
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Number of carried-over samples waiting for a full frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add a chunk and return every complete frame it produced.
    pub fn push(&mut self, chunk: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() < self.frame_len {
            return Vec::new();
        }

        let complete = self.pending.len() / self.frame_len * self.frame_len;
        let frames = self.pending[..complete]
            .chunks_exact(self.frame_len)
            .map(<[i16]>::to_vec)
            .collect();
        self.pending.drain(..complete);
        frames
    }

    /// Take the partial frame, leaving the assembler empty.
    pub fn take_remainder(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.pending)
    }
}

//! Voice activity classification.
//!
//! Classifies single frames as voice or non-voice. The speech/silence state
//! machine that consumes these decisions lives in the session segmenter.

use crate::error::{Result, SttError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test (or the replay command) can
/// advance the clock seen by every session.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-frame voice/non-voice decision.
///
/// Failures are non-fatal: the caller skips the frame's state-machine
/// update and keeps going.
pub trait VoiceClassifier: Send + Sync {
    fn is_voice(&self, frame: &[i16]) -> Result<bool>;
}

impl<T: VoiceClassifier + ?Sized> VoiceClassifier for Arc<T> {
    fn is_voice(&self, frame: &[i16]) -> Result<bool> {
        (**self).is_voice(frame)
    }
}

/// RMS energy threshold classifier.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// # Arguments
    /// * `threshold` - RMS level (0.0 to 1.0) above which a frame is voice
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn is_voice(&self, frame: &[i16]) -> Result<bool> {
        if frame.is_empty() {
            return Err(SttError::Classification {
                message: "empty frame".to_string(),
            });
        }
        Ok(calculate_rms(frame) > self.threshold)
    }
}

/// Calculates the Root Mean Square (RMS) level of audio samples.
///
/// # Arguments
/// * `samples` - Audio samples as 16-bit PCM
///
/// # Returns
/// RMS level normalized to 0.0 to 1.0 range
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

//! Decode engine boundary.
//!
//! The core treats speech recognition as an opaque, synchronous, possibly
//! slow and possibly failing call. Everything here is the shape of that
//! call: the engine trait, the per-pass profile and the transcript it
//! returns.

pub mod mock;
pub mod synthetic;

pub use mock::MockEngine;
pub use synthetic::SyntheticEngine;

use crate::defaults;
use crate::error::DecodeError;
use crate::scheduler::JobClass;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trait for a speech decode engine.
///
/// Implementations must be callable from several worker threads at once;
/// an engine that can only run one decode at a time should be paired with
/// a single worker.
pub trait DecodeEngine: Send + Sync {
    /// Decode audio samples.
    ///
    /// # Arguments
    /// * `audio` - Mono PCM16 samples for one snapshot window
    /// * `profile` - Pass-specific decode settings
    ///
    /// # Returns
    /// Transcript with segment times relative to the start of `audio`
    fn decode(&self, audio: &[i16], profile: &DecodeProfile) -> Result<Transcript, DecodeError>;

    /// Name of the loaded model or backend
    fn name(&self) -> &str;

    /// Check if the engine can accept work
    fn is_ready(&self) -> bool;
}

/// Implement DecodeEngine for Arc<T> to allow sharing across workers.
impl<T: DecodeEngine + ?Sized> DecodeEngine for Arc<T> {
    fn decode(&self, audio: &[i16], profile: &DecodeProfile) -> Result<Transcript, DecodeError> {
        (**self).decode(audio, profile)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Timed piece of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Same segment moved by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            text: self.text.clone(),
        }
    }
}

/// Engine output for one snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    /// Detected or hinted language, when the engine reports one.
    pub language: Option<String>,
}

impl Transcript {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Decode settings for one pass.
///
/// INTERIM passes are fast and never condition on previous text, which
/// keeps rapid partial decodes from drifting into repetition. FINAL passes
/// trade latency for quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeProfile {
    pub pass: JobClass,
    pub beam_size: u32,
    /// Temperature fallback ladder, tried in order.
    pub temperatures: Vec<f32>,
    pub timestamps: bool,
    pub condition_on_previous_text: bool,
    pub detect_language: bool,
    /// `None` means the engine should pick or detect the language.
    pub language: Option<String>,
}

impl DecodeProfile {
    /// Fast profile for interim passes.
    pub fn interim(language: &str) -> Self {
        Self {
            pass: JobClass::Interim,
            beam_size: 1,
            temperatures: vec![0.0],
            timestamps: false,
            condition_on_previous_text: false,
            detect_language: false,
            language: language_hint(language),
        }
    }

    /// Quality profile for final passes.
    pub fn final_pass(language: &str) -> Self {
        let language = language_hint(language);
        Self {
            pass: JobClass::Final,
            beam_size: 5,
            temperatures: vec![0.0, 0.2, 0.4],
            timestamps: true,
            condition_on_previous_text: true,
            detect_language: language.is_none(),
            language,
        }
    }

    pub fn for_class(class: JobClass, language: &str) -> Self {
        match class {
            JobClass::Final => Self::final_pass(language),
            JobClass::Interim => Self::interim(language),
        }
    }

    /// Cheaper variant used for the single retry of a failed final.
    ///
    /// Keeps timestamps and language handling so the result has the same
    /// shape as a normal final.
    pub fn reduced(&self) -> Self {
        Self {
            beam_size: 1,
            temperatures: vec![0.0],
            condition_on_previous_text: false,
            ..self.clone()
        }
    }
}

fn language_hint(language: &str) -> Option<String> {
    let language = language.trim();
    if language.is_empty() || language.eq_ignore_ascii_case(defaults::AUTO_LANGUAGE) {
        None
    } else {
        Some(language.to_ascii_lowercase())
    }
}

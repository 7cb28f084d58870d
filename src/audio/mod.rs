//! Audio primitives: bounded session buffers, voice classification and
//! WAV loading.

pub mod buffer;
pub mod vad;
#[cfg(feature = "wav")]
pub mod wav;

pub use buffer::{AudioBuffer, AudioSnapshot, FrameAssembler};
pub use vad::{Clock, EnergyClassifier, ManualClock, SystemClock, VoiceClassifier, calculate_rms};

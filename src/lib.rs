//! dualstt - Session-aware scheduling core for streaming speech-to-text
//!
//! Splits each audio stream into utterances, schedules low-latency interim
//! decodes and authoritative final decodes on a shared worker pool, and
//! throttles interims under load so finals never starve.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod backpressure;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decode;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod worker;

// Engine seam
pub use decode::{DecodeEngine, DecodeProfile, Segment, Transcript};

// Composition root
pub use runtime::{RuntimeStatus, SessionHandle, SessionStart, SttRuntime, SttRuntimeBuilder};

// Scheduling
pub use backpressure::{BackpressureLevel, BackpressureStatus};
pub use scheduler::{JobClass, PriorityScheduler};

// Wire events
pub use protocol::{ClientEvent, ErrorCode, ServerEvent};

// Error handling
pub use error::{DecodeError, Result, SttError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

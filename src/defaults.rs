//! Default configuration constants for dualstt.
//!
//! Shared by the config layer, the session segmenter and the scheduler so
//! that every tunable has exactly one default.

/// Default audio sample rate in Hz.
///
/// 16kHz mono PCM16 is what the decode engines expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Default VAD frame duration in milliseconds.
///
/// Inbound audio is re-chunked into frames of this size before classification.
pub const FRAME_MS: u32 = 30;

/// Default RMS threshold for the energy voice classifier.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Seconds of audio retained per session.
///
/// Oldest samples are evicted once a session buffer exceeds this.
pub const MAX_BUFFER_SECONDS: f32 = 30.0;

/// Silence required to finalize a very short utterance (ms).
pub const FINAL_SILENCE_MS_MIN: u32 = 400;

/// Silence required to finalize a long utterance (ms).
pub const FINAL_SILENCE_MS_MAX: u32 = 700;

/// Voiced duration at which the finalization threshold reaches its maximum (ms).
pub const LONG_UTTERANCE_MS: u32 = 3000;

/// Minimum time between interim triggers for one session (ms).
pub const INTERIM_COOLDOWN_MS: u64 = 220;

/// Accepted range for interim cooldowns, config and client overrides alike.
pub const INTERIM_COOLDOWN_RANGE_MS: (u64, u64) = (50, 1000);

/// Trailing window of audio decoded for interim passes (seconds).
pub const TAIL_SECONDS: f32 = 7.0;

/// Accepted range for tail windows, config and client overrides alike.
pub const TAIL_SECONDS_RANGE: (f32, f32) = (1.0, 30.0);

/// Tail floor while backpressure is HIGH (seconds).
pub const HIGH_TAIL_FLOOR_SECONDS: f32 = 3.0;

/// Tail floor while backpressure is CRITICAL (seconds).
pub const CRITICAL_TAIL_FLOOR_SECONDS: f32 = 1.5;

/// Backpressure sampling interval (ms).
pub const SCHEDULER_TICK_MS: u64 = 12;

/// Number of decode workers.
///
/// One per decode-engine replica; more workers than replicas only adds queuing.
pub const WORKERS: usize = 1;

/// FINAL queue depth at which backpressure becomes HIGH.
pub const FINAL_HI: usize = 6;

/// FINAL queue depth at which backpressure becomes CRITICAL.
pub const FINAL_CRIT: usize = 12;

/// INTERIM queue depth at which backpressure becomes HIGH.
pub const INTERIM_HI: usize = 20;

/// INTERIM queue depth at which backpressure becomes CRITICAL.
pub const INTERIM_CRIT: usize = 40;

/// Interim cooldown multiplier applied under HIGH and CRITICAL load.
pub const BACKOFF_FACTOR: f32 = 2.0;

/// Consecutive calmer ticks required before the backpressure level drops.
///
/// 1 means the level follows queue depths immediately.
pub const HYSTERESIS_TICKS: u32 = 1;

/// How long an explicit stop waits for outstanding FINAL results (ms).
pub const STOP_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Capacity of each session's inbound and outbound channels.
pub const SESSION_CHANNEL_CAPACITY: usize = 256;

/// Language hint that asks the engine to detect the language.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default language hint.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Default log level when `RUST_LOG` is unset.
pub const LOG_LEVEL: &str = "info";

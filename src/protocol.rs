//! JSON message shapes exchanged with the transport.
//!
//! Framing (WebSocket, lines, ...) belongs to the transport; this module
//! only fixes the event payloads and the PCM16 byte layout.

use crate::backpressure::{BackpressureLevel, BackpressureStatus};
use crate::decode::Segment;
use crate::defaults;
use crate::error::{Result, SttError};
use serde::{Deserialize, Serialize};

/// Control events sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Open the stream
    Start {
        #[serde(default = "default_language")]
        language: String,
        #[serde(default)]
        sample_rate: Option<u32>,
    },
    /// Finish the stream, flushing any buffered utterance
    Stop,
    /// Per-session tuning
    Set {
        /// Interim cooldown override in milliseconds
        #[serde(default)]
        interim_rate: Option<u64>,
        #[serde(default)]
        tail_seconds: Option<f32>,
    },
}

fn default_language() -> String {
    defaults::DEFAULT_LANGUAGE.to_string()
}

impl ClientEvent {
    /// Serialize event to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Error codes carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FinalDecodeFailed,
    InvalidAudio,
    SessionClosed,
}

/// Events emitted to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Low-latency partial transcript
    Interim {
        conn: String,
        text: String,
        stable_chars: usize,
        t0: f64,
        t1: f64,
    },
    /// Completed utterance
    Final {
        conn: String,
        text: String,
        segments: Vec<Segment>,
        language: Option<String>,
        t0: f64,
        t1: f64,
        sequence: u64,
    },
    /// Current load and throttling knobs
    Status {
        backpressure: BackpressureLevel,
        cooldown_ms: u64,
        tail_s: f32,
        interim_paused: bool,
    },
    /// Session-level failure
    Error { code: ErrorCode, detail: String },
}

impl ServerEvent {
    pub fn status(status: &BackpressureStatus) -> Self {
        ServerEvent::Status {
            backpressure: status.level,
            cooldown_ms: status.cooldown_ms,
            tail_s: status.tail_seconds,
            interim_paused: status.interim_paused,
        }
    }

    pub fn error(code: ErrorCode, detail: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            detail: detail.into(),
        }
    }

    /// Serialize event to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Decode little-endian PCM16 bytes.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(SttError::Audio {
            message: format!("PCM16 payload has odd length {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples as little-endian PCM16 bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

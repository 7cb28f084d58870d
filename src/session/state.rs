use crate::audio::AudioBuffer;
use crate::audio::buffer::samples_to_ms;
use crate::session::stability::StabilityTracker;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Instant;

/// Opaque connection identifier, displayed as `conn_<16 hex digits>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:016x}", self.0)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Speech/silence state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VadState {
    Silence,
    Speech,
}

/// Per-connection audio and utterance bookkeeping.
///
/// Owned by exactly one session task. Positions are absolute sample
/// indices into the stream; utterance fields are meaningful only while
/// `vad_state` is `Speech`.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub language: String,
    pub buffer: AudioBuffer,
    pub vad_state: VadState,
    /// First sample of the current utterance.
    pub utterance_start: u64,
    /// One past the last voiced sample of the current utterance.
    pub last_voice_end: u64,
    /// Consecutive non-voice samples since the last voiced frame.
    pub silence_run: u64,
    /// Number of utterances started so far; identifies the current one.
    pub utterance: u64,
    pub stability: StabilityTracker,
    pub last_interim_emit: Option<Instant>,
    /// Value of `last_interim_emit` before the most recent interim request.
    pub interim_emit_before: Option<Instant>,
    pub next_final_sequence: u64,
    pub next_interim_sequence: u64,
    /// Set once the client asked to stop; suppresses further interims.
    pub stopping: bool,
}

impl SessionState {
    pub fn new(id: SessionId, language: &str, buffer: AudioBuffer) -> Self {
        Self {
            id,
            language: language.to_string(),
            buffer,
            vad_state: VadState::Silence,
            utterance_start: 0,
            last_voice_end: 0,
            silence_run: 0,
            utterance: 0,
            stability: StabilityTracker::new(),
            last_interim_emit: None,
            interim_emit_before: None,
            next_final_sequence: 0,
            next_interim_sequence: 0,
            stopping: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    pub fn is_speech(&self) -> bool {
        self.vad_state == VadState::Speech
    }

    pub fn silence_run_ms(&self) -> u64 {
        samples_to_ms(self.silence_run, self.sample_rate())
    }

    /// Voiced span of the current utterance, excluding trailing silence.
    pub fn utterance_duration_ms(&self) -> u64 {
        if !self.is_speech() {
            return 0;
        }
        samples_to_ms(
            self.last_voice_end.saturating_sub(self.utterance_start),
            self.sample_rate(),
        )
    }

    /// Enter SPEECH at a voice frame spanning `[frame_start, frame_end)`.
    pub fn begin_utterance(&mut self, frame_start: u64, frame_end: u64) {
        self.vad_state = VadState::Speech;
        self.utterance += 1;
        self.utterance_start = frame_start;
        self.last_voice_end = frame_end;
        self.silence_run = 0;
    }

    /// Return to SILENCE, clearing utterance accumulators.
    pub fn end_utterance(&mut self) {
        self.vad_state = VadState::Silence;
        self.silence_run = 0;
        self.utterance_start = self.buffer.end();
        self.last_voice_end = self.buffer.end();
        self.stability.reset();
    }

    pub fn take_final_sequence(&mut self) -> u64 {
        let sequence = self.next_final_sequence;
        self.next_final_sequence += 1;
        sequence
    }

    /// Give back the cooldown window taken by an interim the scheduler
    /// refused, so the next frame may try again.
    pub fn revert_interim_emit(&mut self) {
        self.last_interim_emit = self.interim_emit_before.take();
    }

    pub fn take_interim_sequence(&mut self) -> u64 {
        let sequence = self.next_interim_sequence;
        self.next_interim_sequence += 1;
        sequence
    }
}

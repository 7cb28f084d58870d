//! Utterance segmentation with adaptive finalization.
//!
//! A pure speech/silence state machine over `(frame, state)`. It mutates
//! only the session state it is handed and returns the job (if any) the
//! frame triggered, so it is testable without tasks or channels.

use crate::audio::buffer::{ms_to_samples, seconds_to_samples};
use crate::config::SegmenterConfig;
use crate::decode::DecodeProfile;
use crate::scheduler::{JobClass, JobRequest};
use crate::session::state::{SessionState, VadState};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Silence needed to finalize an utterance of a given voiced length.
///
/// Implementations must be non-decreasing in `utterance_ms`.
pub trait FinalizationPolicy: Send + Sync {
    fn threshold_ms(&self, utterance_ms: u64) -> u64;
}

/// Linear interpolation from `min_ms` at 0 to `max_ms` at `long_ms`.
///
/// Short utterances finalize quickly; long ones tolerate mid-sentence
/// pauses.
#[derive(Debug, Clone, Copy)]
pub struct LinearFinalization {
    pub min_ms: u32,
    pub max_ms: u32,
    pub long_ms: u32,
}

impl LinearFinalization {
    pub fn from_config(config: &SegmenterConfig) -> Self {
        Self {
            min_ms: config.final_silence_ms_min,
            max_ms: config.final_silence_ms_max.max(config.final_silence_ms_min),
            long_ms: config.long_utterance_ms.max(1),
        }
    }
}

impl Default for LinearFinalization {
    fn default() -> Self {
        Self::from_config(&SegmenterConfig::default())
    }
}

impl FinalizationPolicy for LinearFinalization {
    fn threshold_ms(&self, utterance_ms: u64) -> u64 {
        let progress = (utterance_ms as f64 / self.long_ms as f64).clamp(0.0, 1.0);
        let span = (self.max_ms - self.min_ms) as f64;
        (self.min_ms as f64 + span * progress).round() as u64
    }
}

/// Interim admission inputs for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterimGate {
    pub cooldown: Duration,
    pub tail_seconds: f32,
    /// Interims are globally paused or the session is stopping.
    pub paused: bool,
    /// A worker is already decoding an interim for this session. A queued
    /// one does not block; the scheduler replaces it with the newer snapshot.
    pub in_flight: bool,
}

/// Drives a session through SILENCE/SPEECH and decides when to request work.
#[derive(Clone)]
pub struct UtteranceSegmenter {
    policy: Arc<dyn FinalizationPolicy>,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new(Arc::new(LinearFinalization::default()))
    }
}

impl UtteranceSegmenter {
    pub fn new(policy: Arc<dyn FinalizationPolicy>) -> Self {
        Self { policy }
    }

    pub fn threshold_ms(&self, utterance_ms: u64) -> u64 {
        self.policy.threshold_ms(utterance_ms)
    }

    /// Process one VAD frame.
    ///
    /// The frame is always appended to the session buffer. `voice` is `None`
    /// when classification failed; the state machine then skips the frame.
    ///
    /// # Arguments
    /// * `state` - Session state owned by the caller
    /// * `frame` - One VAD frame of PCM16 samples
    /// * `voice` - Classifier decision for the frame
    /// * `now` - Current time, for the interim cooldown
    /// * `gate` - Interim admission inputs
    pub fn on_frame(
        &self,
        state: &mut SessionState,
        frame: &[i16],
        voice: Option<bool>,
        now: Instant,
        gate: &InterimGate,
    ) -> Option<JobRequest> {
        let frame_start = state.buffer.end();
        state.buffer.push(frame);
        let frame_end = state.buffer.end();

        let voice = voice?;

        match state.vad_state {
            VadState::Silence => {
                if !voice {
                    return None;
                }
                state.begin_utterance(frame_start, frame_end);
            }
            VadState::Speech => {
                if voice {
                    state.silence_run = 0;
                    state.last_voice_end = frame_end;
                } else {
                    state.silence_run += frame_end - frame_start;
                    let threshold = self.policy.threshold_ms(state.utterance_duration_ms());
                    if state.silence_run_ms() >= threshold {
                        return Some(self.finalize(state));
                    }
                }
            }
        }

        self.maybe_interim(state, now, gate)
    }

    /// Flush on explicit stop.
    ///
    /// Emits a FINAL for any buffered utterance regardless of the silence
    /// run; in SILENCE nothing is emitted.
    pub fn on_stop(&self, state: &mut SessionState) -> Option<JobRequest> {
        state.stopping = true;
        if state.vad_state != VadState::Speech || state.buffer.end() <= state.utterance_start {
            state.vad_state = VadState::Silence;
            return None;
        }
        Some(self.finalize(state))
    }

    fn finalize(&self, state: &mut SessionState) -> JobRequest {
        let snapshot = state.buffer.window(state.utterance_start);
        let request = JobRequest {
            class: JobClass::Final,
            session: state.id,
            snapshot,
            sequence: state.take_final_sequence(),
            utterance: state.utterance,
            profile: DecodeProfile::for_class(JobClass::Final, &state.language),
        };
        state.end_utterance();
        request
    }

    fn maybe_interim(
        &self,
        state: &mut SessionState,
        now: Instant,
        gate: &InterimGate,
    ) -> Option<JobRequest> {
        if state.stopping || gate.paused || gate.in_flight || !state.is_speech() {
            return None;
        }
        if let Some(last) = state.last_interim_emit
            && now.saturating_duration_since(last) < gate.cooldown
        {
            return None;
        }

        let tail = seconds_to_samples(gate.tail_seconds, state.sample_rate())
            .max(ms_to_samples(1, state.sample_rate()));
        let snapshot = state.buffer.tail_from(state.utterance_start, tail);
        if snapshot.is_empty() {
            return None;
        }

        // Undone by `SessionState::revert_interim_emit` if the scheduler refuses.
        state.interim_emit_before = state.last_interim_emit;
        state.last_interim_emit = Some(now);
        Some(JobRequest {
            class: JobClass::Interim,
            session: state.id,
            snapshot,
            sequence: state.take_interim_sequence(),
            utterance: state.utterance,
            profile: DecodeProfile::for_class(JobClass::Interim, &state.language),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::session::state::SessionId;

    const RATE: u32 = 16000;
    const FRAME_MS: u64 = 20;

    fn frame() -> Vec<i16> {
        vec![0; ms_to_samples(FRAME_MS, RATE) as usize]
    }

    fn state() -> SessionState {
        SessionState::new(SessionId(1), "en", AudioBuffer::new(RATE, 30.0))
    }

    fn open_gate() -> InterimGate {
        InterimGate {
            cooldown: Duration::from_millis(220),
            tail_seconds: 7.0,
            paused: false,
            in_flight: false,
        }
    }

    fn closed_gate() -> InterimGate {
        InterimGate {
            in_flight: true,
            ..open_gate()
        }
    }

    /// Feed `ms` of frames with a fixed voice decision, collecting jobs.
    fn feed(
        segmenter: &UtteranceSegmenter,
        state: &mut SessionState,
        voice: bool,
        ms: u64,
        now: &mut Instant,
        gate: &InterimGate,
    ) -> Vec<JobRequest> {
        let mut jobs = Vec::new();
        for _ in 0..ms / FRAME_MS {
            if let Some(job) = segmenter.on_frame(state, &frame(), Some(voice), *now, gate) {
                jobs.push(job);
            }
            *now += Duration::from_millis(FRAME_MS);
        }
        jobs
    }

    #[test]
    fn test_threshold_endpoints_and_midpoint() {
        let policy = LinearFinalization::default();
        assert_eq!(policy.threshold_ms(0), 400);
        assert_eq!(policy.threshold_ms(1500), 550);
        assert_eq!(policy.threshold_ms(2000), 600);
        assert_eq!(policy.threshold_ms(3000), 700);
        assert_eq!(policy.threshold_ms(60_000), 700);
    }

    #[test]
    fn test_threshold_bounded_and_non_decreasing() {
        let policy = LinearFinalization::default();
        let mut previous = 0;
        for d in (0..10_000).step_by(7) {
            let t = policy.threshold_ms(d);
            assert!((400..=700).contains(&t), "threshold {t} for {d}ms");
            assert!(t >= previous);
            previous = t;
        }
    }

    #[test]
    fn test_threshold_degenerate_config() {
        let policy = LinearFinalization::from_config(&SegmenterConfig {
            final_silence_ms_min: 500,
            final_silence_ms_max: 500,
            long_utterance_ms: 0,
        });
        assert_eq!(policy.threshold_ms(0), 500);
        assert_eq!(policy.threshold_ms(10_000), 500);
    }

    #[test]
    fn test_two_second_utterance_finalizes_after_600ms_silence() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        assert!(feed(&segmenter, &mut state, true, 2000, &mut now, &gate).is_empty());
        assert_eq!(state.utterance_duration_ms(), 2000);

        let jobs = feed(&segmenter, &mut state, false, 580, &mut now, &gate);
        assert!(jobs.is_empty(), "no final before 600ms of silence");
        assert_eq!(state.vad_state, VadState::Speech);

        let jobs = feed(&segmenter, &mut state, false, 20, &mut now, &gate);
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.class, JobClass::Final);
        assert_eq!(job.snapshot.start_sample, 0);
        assert_eq!(job.snapshot.duration_ms(), 2600);
        assert_eq!(job.sequence, 0);
        assert_eq!(state.vad_state, VadState::Silence);

        assert!(feed(&segmenter, &mut state, false, 2000, &mut now, &gate).is_empty());
    }

    #[test]
    fn test_short_utterance_finalizes_sooner() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        feed(&segmenter, &mut state, true, 100, &mut now, &gate);
        // threshold(100) = 410
        assert!(feed(&segmenter, &mut state, false, 400, &mut now, &gate).is_empty());
        assert_eq!(feed(&segmenter, &mut state, false, 20, &mut now, &gate).len(), 1);
    }

    #[test]
    fn test_voice_frame_resets_silence_run() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        feed(&segmenter, &mut state, true, 1000, &mut now, &gate);
        feed(&segmenter, &mut state, false, 300, &mut now, &gate);
        assert_eq!(state.silence_run_ms(), 300);
        feed(&segmenter, &mut state, true, 20, &mut now, &gate);
        assert_eq!(state.silence_run, 0);
        assert_eq!(state.utterance_duration_ms(), 1320);
    }

    #[test]
    fn test_leading_silence_is_not_part_of_utterance() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        feed(&segmenter, &mut state, false, 1000, &mut now, &gate);
        assert_eq!(state.vad_state, VadState::Silence);
        feed(&segmenter, &mut state, true, 200, &mut now, &gate);

        assert_eq!(state.utterance_start, ms_to_samples(1000, RATE));
        assert_eq!(state.utterance, 1);
    }

    #[test]
    fn test_classification_failure_keeps_audio_but_skips_state() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let now = Instant::now();

        let job = segmenter.on_frame(&mut state, &frame(), None, now, &open_gate());

        assert!(job.is_none());
        assert_eq!(state.vad_state, VadState::Silence);
        assert_eq!(state.buffer.len(), frame().len());
    }

    #[test]
    fn test_interim_respects_cooldown() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = open_gate();

        // 1000ms of speech with 220ms cooldown: triggers at 0, 220, 440, 660, 880
        let jobs = feed(&segmenter, &mut state, true, 1000, &mut now, &gate);
        assert_eq!(jobs.len(), 5);
        assert!(jobs.iter().all(|j| j.class == JobClass::Interim));
        let sequences: Vec<u64> = jobs.iter().map(|j| j.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_interim_blocked_while_in_flight_or_paused() {
        let segmenter = UtteranceSegmenter::default();
        let mut now = Instant::now();

        let mut state_a = state();
        let in_flight = closed_gate();
        assert!(feed(&segmenter, &mut state_a, true, 500, &mut now, &in_flight).is_empty());
        assert!(state_a.last_interim_emit.is_none());

        let mut state_b = state();
        let paused = InterimGate {
            paused: true,
            ..open_gate()
        };
        assert!(feed(&segmenter, &mut state_b, true, 500, &mut now, &paused).is_empty());
    }

    #[test]
    fn test_refused_interim_gives_back_cooldown() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let start = Instant::now();
        let mut now = start;
        let gate = open_gate();

        assert_eq!(feed(&segmenter, &mut state, true, 20, &mut now, &gate).len(), 1);
        state.revert_interim_emit();
        assert!(state.last_interim_emit.is_none());

        // 20ms later, well inside the cooldown, the trigger fires again
        let retry = feed(&segmenter, &mut state, true, 20, &mut now, &gate);
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].sequence, 1);
        let accepted_at = start + Duration::from_millis(FRAME_MS);
        assert_eq!(state.last_interim_emit, Some(accepted_at));

        assert!(feed(&segmenter, &mut state, true, 200, &mut now, &gate).is_empty());
        assert_eq!(feed(&segmenter, &mut state, true, 20, &mut now, &gate).len(), 1);
        state.revert_interim_emit();
        assert_eq!(state.last_interim_emit, Some(accepted_at));
    }

    #[test]
    fn test_interim_snapshot_bounded_to_tail() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();

        feed(&segmenter, &mut state, true, 3000, &mut now, &closed_gate());
        let gate = InterimGate {
            tail_seconds: 1.0,
            ..open_gate()
        };
        let jobs = feed(&segmenter, &mut state, true, 20, &mut now, &gate);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].snapshot.duration_ms(), 1000);
        assert_eq!(jobs[0].snapshot.end_sample(), state.buffer.end());
        assert_eq!(jobs[0].profile.pass, JobClass::Interim);
    }

    #[test]
    fn test_final_preempts_interim_and_resets_stability() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();

        feed(&segmenter, &mut state, true, 200, &mut now, &closed_gate());
        state.stability.update("hello");
        let jobs = feed(&segmenter, &mut state, false, 420, &mut now, &open_gate());

        let finals = jobs.iter().filter(|j| j.class == JobClass::Final).count();
        assert_eq!(finals, 1);
        assert_eq!(jobs.last().map(|j| j.class), Some(JobClass::Final));
        assert!(state.stability.last_text().is_none());
    }

    #[test]
    fn test_stop_during_speech_flushes_final() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        feed(&segmenter, &mut state, true, 1000, &mut now, &gate);
        feed(&segmenter, &mut state, false, 40, &mut now, &gate);
        assert_eq!(state.silence_run_ms(), 40);

        let job = segmenter.on_stop(&mut state).unwrap();
        assert_eq!(job.class, JobClass::Final);
        assert_eq!(job.snapshot.duration_ms(), 1040);
        assert!(state.stopping);
        assert_eq!(state.vad_state, VadState::Silence);
    }

    #[test]
    fn test_stop_during_silence_emits_nothing() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();

        feed(&segmenter, &mut state, false, 500, &mut now, &closed_gate());
        assert!(segmenter.on_stop(&mut state).is_none());
        assert!(state.stopping);
    }

    #[test]
    fn test_no_interims_after_stop() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();

        segmenter.on_stop(&mut state);
        assert!(feed(&segmenter, &mut state, true, 500, &mut now, &open_gate()).is_empty());
    }

    #[test]
    fn test_consecutive_utterances_get_increasing_final_sequences() {
        let segmenter = UtteranceSegmenter::default();
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        let mut finals = Vec::new();
        for _ in 0..3 {
            feed(&segmenter, &mut state, true, 300, &mut now, &gate);
            finals.extend(feed(&segmenter, &mut state, false, 700, &mut now, &gate));
        }

        let sequences: Vec<u64> = finals.iter().map(|j| j.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        let utterances: Vec<u64> = finals.iter().map(|j| j.utterance).collect();
        assert_eq!(utterances, vec![1, 2, 3]);
    }

    struct FixedPolicy(u64);

    impl FinalizationPolicy for FixedPolicy {
        fn threshold_ms(&self, _utterance_ms: u64) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_custom_policy_is_pluggable() {
        let segmenter = UtteranceSegmenter::new(Arc::new(FixedPolicy(100)));
        let mut state = state();
        let mut now = Instant::now();
        let gate = closed_gate();

        feed(&segmenter, &mut state, true, 2000, &mut now, &gate);
        assert_eq!(feed(&segmenter, &mut state, false, 100, &mut now, &gate).len(), 1);
    }
}

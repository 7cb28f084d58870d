//! One task per session.
//!
//! The actor owns its `SessionState` outright: it is the only writer of the
//! audio buffer and the only reader that snapshots it. It talks to the rest
//! of the system through the scheduler (`enqueue`), its registry mailbox
//! (decode reports) and the backpressure watch channel.

use crate::audio::{Clock, FrameAssembler, VoiceClassifier};
use crate::backpressure::BackpressureStatus;
use crate::defaults;
use crate::protocol::{ErrorCode, ServerEvent, pcm16_from_le_bytes};
use crate::scheduler::{EnqueueOutcome, JobClass, JobRequest, PriorityScheduler, RejectReason};
use crate::session::segmenter::{InterimGate, UtteranceSegmenter};
use crate::session::state::{SessionId, SessionState};
use crate::worker::{DecodeReport, SessionRegistry};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Inbound messages from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Decoded PCM16 samples of any length
    Audio(Vec<i16>),
    /// Raw little-endian PCM16 bytes
    AudioBytes(Vec<u8>),
    /// Client-side tuning
    Configure(SessionOverrides),
    /// Flush and close
    Stop,
}

/// Per-session overrides of the interim knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionOverrides {
    /// Lower bound on the interim cooldown (ms).
    pub cooldown_ms: Option<u64>,
    /// Upper bound on the interim tail window (seconds).
    pub tail_seconds: Option<f32>,
}

impl SessionOverrides {
    /// Clamp values into the accepted config ranges.
    pub fn clamped(self) -> Self {
        let (cooldown_min, cooldown_max) = defaults::INTERIM_COOLDOWN_RANGE_MS;
        let (tail_min, tail_max) = defaults::TAIL_SECONDS_RANGE;
        Self {
            cooldown_ms: self.cooldown_ms.map(|ms| ms.clamp(cooldown_min, cooldown_max)),
            tail_seconds: self
                .tail_seconds
                .filter(|s| s.is_finite())
                .map(|s| s.clamp(tail_min, tail_max)),
        }
    }

    /// Merge with another set, keeping values present in `other`.
    pub fn merge(self, other: SessionOverrides) -> Self {
        Self {
            cooldown_ms: other.cooldown_ms.or(self.cooldown_ms),
            tail_seconds: other.tail_seconds.or(self.tail_seconds),
        }
    }

    /// Effective knobs given the controller's current status.
    ///
    /// The cooldown can only be lengthened and the tail only shortened, so a
    /// client cannot undo backpressure throttling.
    pub fn apply(&self, status: &BackpressureStatus) -> BackpressureStatus {
        BackpressureStatus {
            cooldown_ms: self
                .cooldown_ms
                .map_or(status.cooldown_ms, |ms| ms.max(status.cooldown_ms)),
            tail_seconds: self
                .tail_seconds
                .map_or(status.tail_seconds, |s| s.min(status.tail_seconds)),
            ..*status
        }
    }
}

/// Shared collaborators handed to every session actor.
#[derive(Clone)]
pub struct SessionContext {
    pub scheduler: Arc<PriorityScheduler>,
    pub registry: Arc<SessionRegistry>,
    pub classifier: Arc<dyn VoiceClassifier>,
    pub clock: Arc<dyn Clock>,
    pub segmenter: UtteranceSegmenter,
    pub status: watch::Receiver<BackpressureStatus>,
    pub frame_ms: u32,
    pub stop_drain_timeout: Duration,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent stop; pending finals were drained.
    Stopped,
    /// Client stopped but pending finals did not arrive in time.
    DrainTimedOut,
    /// Inbound channel closed without stop, or the event receiver went away.
    Disconnected,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub finals: u64,
    pub interims: u64,
    pub errors: u64,
}

pub struct SessionActor {
    state: SessionState,
    ctx: SessionContext,
    assembler: FrameAssembler,
    overrides: SessionOverrides,
    reports: mpsc::UnboundedReceiver<DecodeReport>,
    events: mpsc::Sender<ServerEvent>,
    pending_finals: BTreeSet<u64>,
    last_delivered_final: Option<u64>,
    summary: SessionSummary,
}

impl SessionActor {
    /// Create an actor. The session must already be registered so that
    /// `reports` is its mailbox.
    pub fn new(
        state: SessionState,
        ctx: SessionContext,
        reports: mpsc::UnboundedReceiver<DecodeReport>,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let assembler = FrameAssembler::new(state.sample_rate(), ctx.frame_ms);
        Self {
            state,
            ctx,
            assembler,
            overrides: SessionOverrides::default(),
            reports,
            events,
            pending_finals: BTreeSet::new(),
            last_delivered_final: None,
            summary: SessionSummary {
                end: SessionEnd::Disconnected,
                finals: 0,
                interims: 0,
                errors: 0,
            },
        }
    }

    pub fn with_overrides(mut self, overrides: SessionOverrides) -> Self {
        self.overrides = overrides.clamped();
        self
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    fn effective_status(&self) -> BackpressureStatus {
        self.overrides.apply(&self.ctx.status.borrow())
    }

    /// Run until stop, disconnect or the event receiver is dropped.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<SessionInput>) -> SessionSummary {
        let id = self.state.id;
        tracing::info!(session = %id, language = %self.state.language, "session opened");

        let mut status_rx = self.ctx.status.clone();
        status_rx.mark_unchanged();
        let mut status_open = true;

        let mut connected = self.emit(ServerEvent::status(&self.effective_status())).await;

        while connected {
            tokio::select! {
                biased;

                Some(report) = self.reports.recv() => {
                    connected = self.on_report(report).await;
                }
                input = inbound.recv() => match input {
                    Some(SessionInput::Audio(samples)) => {
                        connected = self.on_audio(&samples).await;
                    }
                    Some(SessionInput::AudioBytes(bytes)) => {
                        connected = match pcm16_from_le_bytes(&bytes) {
                            Ok(samples) => self.on_audio(&samples).await,
                            Err(e) => {
                                self.summary.errors += 1;
                                self.emit(ServerEvent::error(ErrorCode::InvalidAudio, e.to_string())).await
                            }
                        };
                    }
                    Some(SessionInput::Configure(overrides)) => {
                        self.overrides = self.overrides.merge(overrides.clamped());
                        tracing::debug!(session = %id, overrides = ?self.overrides, "session overrides updated");
                        connected = self.emit(ServerEvent::status(&self.effective_status())).await;
                    }
                    Some(SessionInput::Stop) => {
                        self.summary.end = self.stop().await;
                        break;
                    }
                    None => {
                        tracing::info!(session = %id, "inbound closed without stop");
                        break;
                    }
                },
                changed = status_rx.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                    } else {
                        let status = self.overrides.apply(&status_rx.borrow_and_update());
                        connected = self.emit(ServerEvent::status(&status)).await;
                    }
                }
            }
        }

        self.teardown();
        self.summary
    }

    async fn on_audio(&mut self, samples: &[i16]) -> bool {
        if self.state.stopping {
            return true;
        }

        for frame in self.assembler.push(samples) {
            let voice = match self.ctx.classifier.is_voice(&frame) {
                Ok(voice) => Some(voice),
                Err(e) => {
                    tracing::debug!(session = %self.state.id, error = %e, "frame skipped");
                    None
                }
            };

            let status = self.effective_status();
            let gate = InterimGate {
                cooldown: Duration::from_millis(status.cooldown_ms),
                tail_seconds: status.tail_seconds,
                paused: status.interim_paused || self.state.stopping,
                in_flight: self.ctx.scheduler.has_interim_in_flight(self.state.id),
            };
            let now = self.ctx.clock.now();

            if let Some(request) =
                self.ctx
                    .segmenter
                    .on_frame(&mut self.state, &frame, voice, now, &gate)
                && !self.submit(request).await
            {
                return false;
            }
        }
        true
    }

    /// Hand a job to the scheduler. Returns false if the client is gone.
    async fn submit(&mut self, request: JobRequest) -> bool {
        let class = request.class;
        let sequence = request.sequence;
        let t0 = request.snapshot.t0();
        let t1 = request.snapshot.t1();

        match self.ctx.scheduler.enqueue(request) {
            EnqueueOutcome::Queued(job) | EnqueueOutcome::Coalesced(job) => {
                tracing::debug!(
                    session = %self.state.id,
                    job = %job,
                    class = %class,
                    sequence,
                    t0,
                    t1,
                    "job submitted"
                );
                if class == JobClass::Final {
                    self.pending_finals.insert(sequence);
                }
                true
            }
            EnqueueOutcome::Rejected(reason) => {
                tracing::debug!(session = %self.state.id, class = %class, ?reason, "job rejected");
                if class == JobClass::Interim {
                    self.state.revert_interim_emit();
                }
                if class == JobClass::Final
                    && matches!(
                        reason,
                        RejectReason::SessionClosed | RejectReason::SchedulerClosed
                    )
                {
                    self.summary.errors += 1;
                    return self
                        .emit(ServerEvent::error(
                            ErrorCode::SessionClosed,
                            "final could not be scheduled",
                        ))
                        .await;
                }
                true
            }
        }
    }

    async fn on_report(&mut self, report: DecodeReport) -> bool {
        let job = report.job;
        match job.class {
            JobClass::Interim => {
                let fresh = !self.state.stopping
                    && self.state.is_speech()
                    && job.utterance == self.state.utterance;
                match report.outcome {
                    Ok(transcript) if fresh => {
                        let text = transcript.text.trim();
                        if text.is_empty() {
                            return true;
                        }
                        let stable_chars = self.state.stability.update(text);
                        self.summary.interims += 1;
                        self.emit(ServerEvent::Interim {
                            conn: self.state.id.to_string(),
                            text: text.to_string(),
                            stable_chars,
                            t0: job.snapshot.t0(),
                            t1: job.snapshot.t1(),
                        })
                        .await
                    }
                    Ok(_) => {
                        tracing::debug!(session = %self.state.id, job = %job.id, "stale interim dropped");
                        true
                    }
                    Err(_) => true,
                }
            }
            JobClass::Final => {
                self.pending_finals.remove(&job.sequence);
                if let Some(last) = self.last_delivered_final
                    && job.sequence <= last
                {
                    tracing::warn!(
                        session = %self.state.id,
                        sequence = job.sequence,
                        last,
                        "final delivered out of order"
                    );
                }
                self.last_delivered_final = Some(job.sequence);

                match report.outcome {
                    Ok(transcript) => {
                        let t0 = job.snapshot.t0();
                        self.summary.finals += 1;
                        self.emit(ServerEvent::Final {
                            conn: self.state.id.to_string(),
                            text: transcript.text.trim().to_string(),
                            segments: transcript.segments.iter().map(|s| s.shifted(t0)).collect(),
                            language: transcript.language,
                            t0,
                            t1: job.snapshot.t1(),
                            sequence: job.sequence,
                        })
                        .await
                    }
                    Err(e) => {
                        tracing::error!(
                            session = %self.state.id,
                            sequence = job.sequence,
                            error = %e,
                            retried = report.retried,
                            "final decode failed"
                        );
                        self.summary.errors += 1;
                        self.emit(ServerEvent::error(ErrorCode::FinalDecodeFailed, e.message))
                            .await
                    }
                }
            }
        }
    }

    /// Explicit stop: suppress interims, flush the buffered utterance and
    /// wait (bounded) for every outstanding FINAL.
    async fn stop(&mut self) -> SessionEnd {
        let id = self.state.id;
        self.ctx.scheduler.cancel_queued_interims(id);

        let remainder = self.assembler.take_remainder();
        if !remainder.is_empty() {
            self.state.buffer.push(&remainder);
        }
        if let Some(request) = self.ctx.segmenter.on_stop(&mut self.state)
            && !self.submit(request).await
        {
            return SessionEnd::Disconnected;
        }

        let deadline = tokio::time::Instant::now() + self.ctx.stop_drain_timeout;
        while !self.pending_finals.is_empty() {
            match tokio::time::timeout_at(deadline, self.reports.recv()).await {
                Ok(Some(report)) => {
                    if !self.on_report(report).await {
                        return SessionEnd::Disconnected;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        session = %id,
                        pending = self.pending_finals.len(),
                        "stop drain timed out"
                    );
                    return SessionEnd::DrainTimedOut;
                }
            }
        }
        SessionEnd::Stopped
    }

    fn teardown(&mut self) {
        let id = self.state.id;
        let dropped = self.ctx.scheduler.cancel_session(id);
        self.ctx.registry.unregister(id);
        tracing::info!(
            session = %id,
            end = ?self.summary.end,
            finals = self.summary.finals,
            interims = self.summary.interims,
            dropped,
            "session closed"
        );
    }

    async fn emit(&self, event: ServerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

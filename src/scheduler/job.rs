//! Units of scheduled decode work.

use crate::audio::AudioSnapshot;
use crate::decode::DecodeProfile;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Priority class of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobClass {
    Final,
    Interim,
}

impl JobClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobClass::Final => "final",
            JobClass::Interim => "interim",
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler-assigned job identifier, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work submitted by a session, before the scheduler accepts it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub class: JobClass,
    pub session: SessionId,
    pub snapshot: AudioSnapshot,
    /// Per-session, per-class monotonic number. FINAL results are
    /// delivered in this order.
    pub sequence: u64,
    /// Utterance the snapshot belongs to.
    pub utterance: u64,
    pub profile: DecodeProfile,
}

/// Job accepted by the scheduler.
///
/// The snapshot never changes once the job leaves the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub class: JobClass,
    pub session: SessionId,
    pub snapshot: AudioSnapshot,
    pub enqueued_at: Instant,
    pub sequence: u64,
    pub utterance: u64,
    pub profile: DecodeProfile,
}

impl Job {
    pub(crate) fn from_request(id: JobId, request: JobRequest, enqueued_at: Instant) -> Self {
        Self {
            id,
            class: request.class,
            session: request.session,
            snapshot: request.snapshot,
            enqueued_at,
            sequence: request.sequence,
            utterance: request.utterance,
            profile: request.profile,
        }
    }

    /// Replace the payload of a queued job, keeping its id and position.
    pub(crate) fn coalesce(&mut self, request: JobRequest, enqueued_at: Instant) {
        self.snapshot = request.snapshot;
        self.enqueued_at = enqueued_at;
        self.sequence = request.sequence;
        self.utterance = request.utterance;
        self.profile = request.profile;
    }
}

//! Two-class priority scheduler.
//!
//! FINAL jobs are never dropped and always dispatch before INTERIM jobs.
//! Each session has at most one INTERIM queued and one in flight; new
//! interim triggers overwrite the queued one. FINAL jobs of one session run
//! one at a time in sequence order, while finals of different sessions may
//! run concurrently.
//!
//! All queue state sits behind a single mutex so `enqueue`, `next` and
//! `complete` are linearizable with respect to each other.

pub mod job;

pub use job::{Job, JobClass, JobId, JobRequest};

use crate::audio::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::session::SessionId;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Result of submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to its queue.
    Queued(JobId),
    /// Replaced the session's queued interim in place.
    Coalesced(JobId),
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The session already has an interim in flight.
    InFlight,
    /// Interims are globally paused by backpressure.
    Paused,
    /// The session was cancelled.
    SessionClosed,
    /// The scheduler is shutting down.
    SchedulerClosed,
}

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Succeeded,
    Failed,
}

/// Current queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub finals: usize,
    pub interims: usize,
}

/// Per-class counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub enqueued: u64,
    pub coalesced: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    /// Dropped from the queue by pause, cancellation or shutdown.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub finals: ClassStats,
    pub interims: ClassStats,
}

impl SchedulerStats {
    fn class_mut(&mut self, class: JobClass) -> &mut ClassStats {
        match class {
            JobClass::Final => &mut self.finals,
            JobClass::Interim => &mut self.interims,
        }
    }
}

#[derive(Debug, Default)]
struct SessionSlots {
    interim_in_flight: Option<JobId>,
    final_in_flight: Option<JobId>,
    queued_interim: bool,
    closed: bool,
}

impl SessionSlots {
    fn is_idle(&self) -> bool {
        self.interim_in_flight.is_none() && self.final_in_flight.is_none()
    }
}

#[derive(Debug, Default)]
struct Queues {
    finals: VecDeque<Job>,
    interims: VecDeque<Job>,
    sessions: HashMap<SessionId, SessionSlots>,
    in_flight: HashMap<JobId, (SessionId, JobClass)>,
    interims_paused: bool,
    closed: bool,
    next_id: u64,
    stats: SchedulerStats,
}

impl Queues {
    fn dispatch(&mut self) -> Option<Job> {
        if self.closed {
            return None;
        }

        let sessions = &self.sessions;
        let final_idx = self.finals.iter().position(|job| {
            sessions
                .get(&job.session)
                .is_none_or(|slots| slots.final_in_flight.is_none())
        });
        if let Some(idx) = final_idx {
            let job = self.finals.remove(idx)?;
            self.mark_in_flight(&job);
            return Some(job);
        }

        if self.interims_paused {
            return None;
        }

        let interim_idx = self.interims.iter().position(|job| {
            sessions
                .get(&job.session)
                .is_none_or(|slots| slots.interim_in_flight.is_none())
        });
        let job = self.interims.remove(interim_idx?)?;
        self.mark_in_flight(&job);
        Some(job)
    }

    fn mark_in_flight(&mut self, job: &Job) {
        let slots = self.sessions.entry(job.session).or_default();
        match job.class {
            JobClass::Final => slots.final_in_flight = Some(job.id),
            JobClass::Interim => {
                slots.queued_interim = false;
                slots.interim_in_flight = Some(job.id);
            }
        }
        self.in_flight.insert(job.id, (job.session, job.class));
        self.stats.class_mut(job.class).dispatched += 1;
    }

    fn drop_interims_where(&mut self, mut pred: impl FnMut(&Job) -> bool) -> usize {
        let before = self.interims.len();
        let sessions = &mut self.sessions;
        self.interims.retain(|job| {
            if pred(job) {
                if let Some(slots) = sessions.get_mut(&job.session) {
                    slots.queued_interim = false;
                }
                false
            } else {
                true
            }
        });
        let dropped = before - self.interims.len();
        self.stats.interims.dropped += dropped as u64;
        dropped
    }
}

/// Shared two-class job queue.
pub struct PriorityScheduler {
    queues: Mutex<Queues>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a job.
    ///
    /// FINAL jobs are always appended unless the session or the scheduler
    /// is closed. INTERIM jobs are rejected while the session has one in
    /// flight or interims are paused, and coalesce into the session's
    /// queued interim when there is one.
    pub fn enqueue(&self, request: JobRequest) -> EnqueueOutcome {
        let now = self.clock.now();
        let outcome = {
            let mut guard = self.lock();
            let q = &mut *guard;
            let class = request.class;

            if q.closed {
                q.stats.class_mut(class).rejected += 1;
                return EnqueueOutcome::Rejected(RejectReason::SchedulerClosed);
            }

            let slots = q.sessions.entry(request.session).or_default();
            if slots.closed {
                q.stats.class_mut(class).rejected += 1;
                return EnqueueOutcome::Rejected(RejectReason::SessionClosed);
            }

            match class {
                JobClass::Final => {
                    let id = JobId(q.next_id);
                    q.next_id += 1;
                    q.finals.push_back(Job::from_request(id, request, now));
                    q.stats.finals.enqueued += 1;
                    EnqueueOutcome::Queued(id)
                }
                JobClass::Interim => {
                    if slots.interim_in_flight.is_some() {
                        q.stats.interims.rejected += 1;
                        return EnqueueOutcome::Rejected(RejectReason::InFlight);
                    }
                    if q.interims_paused {
                        q.stats.interims.rejected += 1;
                        return EnqueueOutcome::Rejected(RejectReason::Paused);
                    }

                    let queued = slots.queued_interim;
                    let session = request.session;
                    let existing = if queued {
                        q.interims.iter_mut().find(|job| job.session == session)
                    } else {
                        None
                    };

                    if let Some(job) = existing {
                        let id = job.id;
                        job.coalesce(request, now);
                        q.stats.interims.coalesced += 1;
                        EnqueueOutcome::Coalesced(id)
                    } else {
                        let id = JobId(q.next_id);
                        q.next_id += 1;
                        q.interims.push_back(Job::from_request(id, request, now));
                        if let Some(slots) = q.sessions.get_mut(&session) {
                            slots.queued_interim = true;
                        }
                        q.stats.interims.enqueued += 1;
                        EnqueueOutcome::Queued(id)
                    }
                }
            }
        };

        if matches!(outcome, EnqueueOutcome::Queued(_)) {
            self.notify.notify_waiters();
        }
        outcome
    }

    /// Take the highest-priority eligible job without waiting.
    pub fn try_next(&self) -> Option<Job> {
        self.lock().dispatch()
    }

    /// Wait for the highest-priority eligible job.
    ///
    /// Returns `None` once the scheduler is closed.
    pub async fn next(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut q = self.lock();
                if q.closed {
                    return None;
                }
                if let Some(job) = q.dispatch() {
                    return Some(job);
                }
            }

            notified.await;
        }
    }

    /// Release a dispatched job's in-flight slot.
    ///
    /// Completing a FINAL makes the session's next queued FINAL eligible.
    pub fn complete(&self, job: &Job, status: CompletionStatus) -> Result<(), SchedulerError> {
        {
            let mut q = self.lock();
            let Some((session, class)) = q.in_flight.remove(&job.id) else {
                if job.id.0 >= q.next_id {
                    return Err(SchedulerError::UnknownJob { job: job.id.0 });
                }
                return Err(SchedulerError::NotInFlight {
                    job: job.id.0,
                    class: job.class.to_string(),
                    session: job.session.to_string(),
                });
            };

            let stats = q.stats.class_mut(class);
            match status {
                CompletionStatus::Succeeded => stats.completed += 1,
                CompletionStatus::Failed => stats.failed += 1,
            }

            let remove = match q.sessions.get_mut(&session) {
                Some(slots) => {
                    match class {
                        JobClass::Final => slots.final_in_flight = None,
                        JobClass::Interim => slots.interim_in_flight = None,
                    }
                    slots.closed && slots.is_idle()
                }
                None => false,
            };
            if remove {
                q.sessions.remove(&session);
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Drop every queued job of a session and refuse further submissions.
    ///
    /// In-flight jobs run to completion. Returns the number of jobs dropped.
    pub fn cancel_session(&self, session: SessionId) -> usize {
        let mut q = self.lock();

        let before = q.finals.len();
        q.finals.retain(|job| job.session != session);
        let finals_dropped = before - q.finals.len();
        q.stats.finals.dropped += finals_dropped as u64;

        let interims_dropped = q.drop_interims_where(|job| job.session == session);

        let idle = match q.sessions.get_mut(&session) {
            Some(slots) => {
                slots.closed = true;
                slots.is_idle()
            }
            None => false,
        };
        if idle {
            q.sessions.remove(&session);
        }

        finals_dropped + interims_dropped
    }

    /// Drop the session's queued interim, if any.
    pub fn cancel_queued_interims(&self, session: SessionId) -> bool {
        self.lock().drop_interims_where(|job| job.session == session) > 0
    }

    /// Drop every queued interim. Returns the number dropped.
    pub fn drop_queued_interims(&self) -> usize {
        self.lock().drop_interims_where(|_| true)
    }

    /// Pause or resume interim dispatch and admission.
    pub fn set_interims_paused(&self, paused: bool) {
        let changed = {
            let mut q = self.lock();
            let changed = q.interims_paused != paused;
            q.interims_paused = paused;
            changed
        };
        if changed && !paused {
            self.notify.notify_waiters();
        }
    }

    pub fn interims_paused(&self) -> bool {
        self.lock().interims_paused
    }

    /// True while a worker is decoding an interim for the session. A
    /// merely queued interim does not count; resubmitting refreshes it.
    pub fn has_interim_in_flight(&self, session: SessionId) -> bool {
        self.lock()
            .sessions
            .get(&session)
            .is_some_and(|slots| slots.interim_in_flight.is_some())
    }

    pub fn depths(&self) -> QueueDepths {
        let q = self.lock();
        QueueDepths {
            finals: q.finals.len(),
            interims: q.interims.len(),
        }
    }

    /// Age of the oldest queued job of a class.
    pub fn oldest_age(&self, class: JobClass) -> Option<Duration> {
        let now = self.clock.now();
        let q = self.lock();
        let queue = match class {
            JobClass::Final => &q.finals,
            JobClass::Interim => &q.interims,
        };
        queue
            .iter()
            .map(|job| job.enqueued_at)
            .min()
            .map(|oldest| now.saturating_duration_since(oldest))
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats
    }

    /// Stop dispatching. Waiting workers get `None`; queued jobs are dropped.
    pub fn close(&self) {
        {
            let mut q = self.lock();
            q.closed = true;
            let finals = q.finals.len() as u64;
            let interims = q.interims.len() as u64;
            q.finals.clear();
            q.interims.clear();
            q.stats.finals.dropped += finals;
            q.stats.interims.dropped += interims;
            for slots in q.sessions.values_mut() {
                slots.queued_interim = false;
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

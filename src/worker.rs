//! Decode worker pool and result routing.
//!
//! Each worker loops on the scheduler: take the highest-priority job, run
//! the engine on tokio's blocking pool, hand the result to the owning
//! session, then release the job's in-flight slot. Delivering before
//! releasing means a session's next FINAL cannot be dispatched until the
//! previous result is already in the session's mailbox.

use crate::decode::{DecodeEngine, Transcript};
use crate::error::DecodeError;
use crate::scheduler::{CompletionStatus, Job, JobClass, PriorityScheduler};
use crate::session::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Decode outcome routed back to a session.
#[derive(Debug)]
pub struct DecodeReport {
    pub job: Job,
    pub outcome: Result<Transcript, DecodeError>,
    /// A failed FINAL was retried with the reduced profile.
    pub retried: bool,
}

/// Explicitly owned map from live sessions to their result mailboxes.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    routes: RwLock<HashMap<SessionId, mpsc::UnboundedSender<DecodeReport>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its result mailbox.
    pub fn register(&self, session: SessionId) -> mpsc::UnboundedReceiver<DecodeReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session, tx);
        rx
    }

    pub fn unregister(&self, session: SessionId) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session)
            .is_some()
    }

    /// Route a report to its session.
    ///
    /// Returns false when the session is gone; the report is discarded.
    pub fn deliver(&self, report: DecodeReport) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        match routes.get(&report.job.session) {
            Some(tx) => tx.send(report).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&session)
    }

    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed set of decode workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    ///
    /// # Arguments
    /// * `size` - Number of workers; match it to the engine's real concurrency
    /// * `scheduler` - Shared job source
    /// * `engine` - Decode engine shared by all workers
    /// * `registry` - Session mailboxes for results
    /// * `final_retry` - Retry a failed FINAL once with the reduced profile
    pub fn spawn(
        size: usize,
        scheduler: Arc<PriorityScheduler>,
        engine: Arc<dyn DecodeEngine>,
        registry: Arc<SessionRegistry>,
        final_retry: bool,
    ) -> Self {
        let handles = (0..size.max(1))
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    scheduler.clone(),
                    engine.clone(),
                    registry.clone(),
                    final_retry,
                ))
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Workers exit once the scheduler closes.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "decode worker panicked");
            }
        }
    }
}

async fn run_worker(
    index: usize,
    scheduler: Arc<PriorityScheduler>,
    engine: Arc<dyn DecodeEngine>,
    registry: Arc<SessionRegistry>,
    final_retry: bool,
) {
    tracing::debug!(worker = index, engine = engine.name(), "decode worker started");

    while let Some(job) = scheduler.next().await {
        tracing::debug!(
            worker = index,
            job = %job.id,
            class = %job.class,
            session = %job.session,
            samples = job.snapshot.len(),
            "dispatched"
        );

        let (outcome, retried) = decode_job(&engine, &job, final_retry).await;
        let status = match &outcome {
            Ok(_) => CompletionStatus::Succeeded,
            Err(e) => {
                match job.class {
                    JobClass::Final => tracing::warn!(
                        job = %job.id,
                        session = %job.session,
                        error = %e,
                        retried,
                        "final decode failed"
                    ),
                    JobClass::Interim => tracing::debug!(
                        job = %job.id,
                        session = %job.session,
                        error = %e,
                        "interim decode failed"
                    ),
                }
                CompletionStatus::Failed
            }
        };

        let delivered = registry.deliver(DecodeReport {
            job: job.clone(),
            outcome,
            retried,
        });
        if !delivered {
            tracing::debug!(job = %job.id, session = %job.session, "session gone, result discarded");
        }

        if let Err(e) = scheduler.complete(&job, status) {
            tracing::warn!(job = %job.id, error = %e, "scheduler invariant violated");
            if cfg!(debug_assertions) {
                panic!("scheduler invariant violated: {e}");
            }
        }
    }

    tracing::debug!(worker = index, "decode worker stopped");
}

/// Run one job on the blocking pool, retrying a failed FINAL once if asked.
async fn decode_job(
    engine: &Arc<dyn DecodeEngine>,
    job: &Job,
    final_retry: bool,
) -> (Result<Transcript, DecodeError>, bool) {
    let first = run_blocking(engine, job, job.profile.clone()).await;
    match first {
        Err(e) if final_retry && e.retryable && job.class == JobClass::Final => {
            tracing::info!(job = %job.id, session = %job.session, "retrying final with reduced profile");
            (run_blocking(engine, job, job.profile.reduced()).await, true)
        }
        other => (other, false),
    }
}

async fn run_blocking(
    engine: &Arc<dyn DecodeEngine>,
    job: &Job,
    profile: crate::decode::DecodeProfile,
) -> Result<Transcript, DecodeError> {
    let engine = engine.clone();
    let samples = job.snapshot.samples.clone();
    tokio::task::spawn_blocking(move || engine.decode(&samples, &profile))
        .await
        .map_err(|e| DecodeError::new(format!("decode task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSnapshot;
    use crate::decode::{DecodeProfile, MockEngine};
    use crate::scheduler::JobRequest;
    use std::time::Duration;

    fn request(class: JobClass, session: u64, sequence: u64) -> JobRequest {
        JobRequest {
            class,
            session: SessionId(session),
            snapshot: AudioSnapshot::new(vec![0; 1600], 0, 16000),
            sequence,
            utterance: 1,
            profile: DecodeProfile::for_class(class, "en"),
        }
    }

    #[test]
    fn test_registry_register_deliver_unregister() {
        let registry = SessionRegistry::new();
        let mut rx = registry.register(SessionId(1));
        assert!(registry.contains(SessionId(1)));
        assert_eq!(registry.len(), 1);

        let scheduler = PriorityScheduler::new();
        scheduler.enqueue(request(JobClass::Final, 1, 0));
        let job = scheduler.try_next().unwrap();

        assert!(registry.deliver(DecodeReport {
            job: job.clone(),
            outcome: Ok(Transcript::text("hi")),
            retried: false,
        }));
        assert_eq!(rx.try_recv().unwrap().job.id, job.id);

        assert!(registry.unregister(SessionId(1)));
        assert!(!registry.unregister(SessionId(1)));
        assert!(registry.is_empty());
        assert!(!registry.deliver(DecodeReport {
            job,
            outcome: Ok(Transcript::text("late")),
            retried: false,
        }));
    }

    #[tokio::test]
    async fn test_pool_decodes_and_routes_results() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = registry.register(SessionId(1));
        let engine = Arc::new(MockEngine::new("mock").with_response("hello"));

        let pool = WorkerPool::spawn(2, scheduler.clone(), engine.clone(), registry.clone(), false);
        assert_eq!(pool.size(), 2);

        scheduler.enqueue(request(JobClass::Final, 1, 0));
        let report = rx.recv().await.unwrap();
        assert_eq!(report.outcome.unwrap().text, "hello");
        assert!(!report.retried);

        scheduler.close();
        pool.join().await;
        assert_eq!(engine.calls(), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_finals_of_one_session_arrive_in_order() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = registry.register(SessionId(1));
        let engine = Arc::new(MockEngine::new("mock").with_delay(Duration::from_millis(5)));

        for sequence in 0..6 {
            scheduler.enqueue(request(JobClass::Final, 1, sequence));
        }
        let pool = WorkerPool::spawn(4, scheduler.clone(), engine, registry, false);

        let mut sequences = Vec::new();
        for _ in 0..6 {
            sequences.push(rx.recv().await.unwrap().job.sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);

        scheduler.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_final_retry_uses_reduced_profile() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = registry.register(SessionId(1));
        let engine = Arc::new(MockEngine::new("mock").with_final_failures(1));

        let pool = WorkerPool::spawn(1, scheduler.clone(), engine.clone(), registry, true);
        scheduler.enqueue(request(JobClass::Final, 1, 0));

        let report = rx.recv().await.unwrap();
        assert!(report.outcome.is_ok());
        assert!(report.retried);

        let profiles = engine.seen_profiles();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].beam_size, 5);
        assert_eq!(profiles[1].beam_size, 1);
        assert_eq!(scheduler.stats().finals.completed, 1);

        scheduler.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_failed_final_without_retry_is_reported() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = registry.register(SessionId(1));
        let engine = Arc::new(MockEngine::new("mock").with_final_failure());

        let pool = WorkerPool::spawn(1, scheduler.clone(), engine.clone(), registry, false);
        scheduler.enqueue(request(JobClass::Final, 1, 0));

        let report = rx.recv().await.unwrap();
        assert!(report.outcome.is_err());
        assert!(!report.retried);
        assert_eq!(engine.calls(), 1);

        scheduler.close();
        pool.join().await;
        assert_eq!(scheduler.stats().finals.failed, 1);
    }

    #[tokio::test]
    async fn test_results_for_unregistered_session_are_discarded() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let registry = Arc::new(SessionRegistry::new());
        let engine = Arc::new(MockEngine::new("mock"));

        let pool = WorkerPool::spawn(1, scheduler.clone(), engine.clone(), registry, false);
        scheduler.enqueue(request(JobClass::Interim, 9, 0));

        while scheduler.stats().interims.completed == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(scheduler.in_flight(), 0);

        scheduler.close();
        pool.join().await;
    }
}

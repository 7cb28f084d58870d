//! Composition root.
//!
//! `SttRuntime` owns the scheduler, the session registry, the backpressure
//! controller and the worker pool, and opens one actor task per session.
//! Nothing here is global: two runtimes in one process are independent.

use crate::audio::{AudioBuffer, Clock, EnergyClassifier, SystemClock, VoiceClassifier};
use crate::backpressure::{BackpressureController, BackpressureStatus, spawn_controller};
use crate::config::Config;
use crate::decode::DecodeEngine;
use crate::error::{Result, SttError};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::scheduler::{JobClass, PriorityScheduler, QueueDepths, SchedulerStats};
use crate::session::{
    FinalizationPolicy, LinearFinalization, SessionActor, SessionContext, SessionId, SessionInput,
    SessionOverrides, SessionState, SessionSummary, UtteranceSegmenter,
};
use crate::worker::{SessionRegistry, WorkerPool};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Parameters for opening a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStart {
    /// Language hint; the configured default when `None`.
    pub language: Option<String>,
    /// Must match the configured rate when given.
    pub sample_rate: Option<u32>,
    pub overrides: SessionOverrides,
}

impl SessionStart {
    /// Build from a client `start` event. Other events yield `None`.
    pub fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::Start {
                language,
                sample_rate,
            } => Some(Self {
                language: Some(language.clone()),
                sample_rate: *sample_rate,
                overrides: SessionOverrides::default(),
            }),
            _ => None,
        }
    }
}

/// Read-only snapshot for health and status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub backpressure: BackpressureStatus,
    pub depths: QueueDepths,
    pub oldest_final_ms: Option<u64>,
    pub oldest_interim_ms: Option<u64>,
    pub in_flight: usize,
    pub stats: SchedulerStats,
    pub active_sessions: usize,
    pub workers: usize,
    pub engine: String,
    pub engine_ready: bool,
}

pub struct SttRuntimeBuilder {
    config: Config,
    engine: Arc<dyn DecodeEngine>,
    classifier: Option<Arc<dyn VoiceClassifier>>,
    clock: Option<Arc<dyn Clock>>,
    policy: Option<Arc<dyn FinalizationPolicy>>,
}

impl SttRuntimeBuilder {
    /// Replace the energy classifier built from `audio.vad_threshold`.
    pub fn with_classifier(mut self, classifier: Arc<dyn VoiceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the linear finalization curve.
    pub fn with_finalization_policy(mut self, policy: Arc<dyn FinalizationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the config and spawn the controller and workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<SttRuntime> {
        self.config.validate()?;
        let config = self.config;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(EnergyClassifier::new(config.audio.vad_threshold)));
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(LinearFinalization::from_config(&config.segmenter)));

        let scheduler = Arc::new(PriorityScheduler::with_clock(clock.clone()));
        let registry = Arc::new(SessionRegistry::new());

        let controller = BackpressureController::new(&config.backpressure, &config.interim);
        let (status_tx, status_rx) = watch::channel(controller.status());
        let controller_task = spawn_controller(
            controller,
            scheduler.clone(),
            config.scheduler.tick(),
            status_tx,
        );

        let pool = WorkerPool::spawn(
            config.scheduler.workers,
            scheduler.clone(),
            self.engine.clone(),
            registry.clone(),
            config.decode.final_retry,
        );

        tracing::info!(
            workers = pool.size(),
            engine = self.engine.name(),
            tick_ms = config.scheduler.tick_ms,
            "runtime started"
        );

        let context = SessionContext {
            scheduler: scheduler.clone(),
            registry: registry.clone(),
            classifier,
            clock,
            segmenter: UtteranceSegmenter::new(policy),
            status: status_rx.clone(),
            frame_ms: config.audio.frame_ms,
            stop_drain_timeout: config.scheduler.stop_drain_timeout(),
        };

        Ok(SttRuntime {
            config,
            engine: self.engine,
            scheduler,
            registry,
            status_rx,
            context,
            controller: controller_task,
            pool,
            next_session: AtomicU64::new(1),
        })
    }
}

/// Running scheduling core.
pub struct SttRuntime {
    config: Config,
    engine: Arc<dyn DecodeEngine>,
    scheduler: Arc<PriorityScheduler>,
    registry: Arc<SessionRegistry>,
    status_rx: watch::Receiver<BackpressureStatus>,
    context: SessionContext,
    controller: JoinHandle<()>,
    pool: WorkerPool,
    next_session: AtomicU64,
}

impl SttRuntime {
    pub fn builder(config: Config, engine: Arc<dyn DecodeEngine>) -> SttRuntimeBuilder {
        SttRuntimeBuilder {
            config,
            engine,
            classifier: None,
            clock: None,
            policy: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PriorityScheduler> {
        &self.scheduler
    }

    /// Open a session and spawn its actor.
    pub fn open_session(&self, start: SessionStart) -> Result<SessionHandle> {
        if self.scheduler.is_closed() {
            return Err(SttError::Runtime {
                message: "runtime is shutting down".to_string(),
            });
        }

        let sample_rate = self.config.audio.sample_rate;
        if let Some(requested) = start.sample_rate
            && requested != sample_rate
        {
            return Err(SttError::Audio {
                message: format!("unsupported sample rate {requested} (expected {sample_rate})"),
            });
        }

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let language = start
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.config.decode.language.clone());

        let buffer = AudioBuffer::new(sample_rate, self.config.audio.max_buffer_seconds);
        let state = SessionState::new(id, &language, buffer);

        let capacity = self.config.scheduler.session_channel_capacity;
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        let reports = self.registry.register(id);
        let actor = SessionActor::new(state, self.context.clone(), reports, event_tx)
            .with_overrides(start.overrides);
        let task = tokio::spawn(actor.run(input_rx));

        Ok(SessionHandle {
            id,
            input: input_tx,
            events: event_rx,
            task,
        })
    }

    /// Current backpressure knobs.
    pub fn backpressure(&self) -> BackpressureStatus {
        *self.status_rx.borrow()
    }

    /// Receiver that changes whenever the backpressure knobs change.
    pub fn status_updates(&self) -> watch::Receiver<BackpressureStatus> {
        self.status_rx.clone()
    }

    pub fn status(&self) -> RuntimeStatus {
        let as_ms = |d: std::time::Duration| d.as_millis() as u64;
        RuntimeStatus {
            backpressure: self.backpressure(),
            depths: self.scheduler.depths(),
            oldest_final_ms: self.scheduler.oldest_age(JobClass::Final).map(as_ms),
            oldest_interim_ms: self.scheduler.oldest_age(JobClass::Interim).map(as_ms),
            in_flight: self.scheduler.in_flight(),
            stats: self.scheduler.stats(),
            active_sessions: self.registry.len(),
            workers: self.pool.size(),
            engine: self.engine.name().to_string(),
            engine_ready: self.engine.is_ready(),
        }
    }

    /// Close the scheduler and wait for the controller and workers.
    ///
    /// Workers finish their current decode; queued jobs are dropped.
    /// Open sessions see further submissions rejected.
    pub async fn shutdown(self) {
        tracing::info!("runtime shutting down");
        self.scheduler.close();
        if let Err(e) = self.controller.await {
            tracing::error!(error = %e, "backpressure controller panicked");
        }
        self.pool.join().await;
        tracing::info!("runtime stopped");
    }
}

/// Transport-side handle of one session.
pub struct SessionHandle {
    id: SessionId,
    input: mpsc::Sender<SessionInput>,
    events: mpsc::Receiver<ServerEvent>,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    async fn send(&self, input: SessionInput) -> Result<()> {
        self.input
            .send(input)
            .await
            .map_err(|_| SttError::SessionClosed {
                session: self.id.to_string(),
            })
    }

    pub async fn send_audio(&self, samples: Vec<i16>) -> Result<()> {
        self.send(SessionInput::Audio(samples)).await
    }

    pub async fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        self.send(SessionInput::AudioBytes(bytes)).await
    }

    pub async fn configure(&self, overrides: SessionOverrides) -> Result<()> {
        self.send(SessionInput::Configure(overrides)).await
    }

    /// Apply a client control event.
    ///
    /// `start` is only meaningful when opening a session and is ignored.
    pub async fn handle_event(&self, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Start { .. } => Ok(()),
            ClientEvent::Stop => self.stop().await,
            ClientEvent::Set {
                interim_rate,
                tail_seconds,
            } => {
                self.configure(SessionOverrides {
                    cooldown_ms: interim_rate,
                    tail_seconds,
                })
                .await
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(SessionInput::Stop).await
    }

    /// Next event, or `None` once the session has ended and all events
    /// were read.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Drop the inbound side (a disconnect) and keep reading events.
    pub fn disconnect(self) -> (mpsc::Receiver<ServerEvent>, JoinHandle<SessionSummary>) {
        (self.events, self.task)
    }

    /// Extra sender for feeding audio from another task.
    pub fn input(&self) -> mpsc::Sender<SessionInput> {
        self.input.clone()
    }

    /// Drop the event side, which ends the session, and wait for the actor.
    pub async fn join(self) -> Result<SessionSummary> {
        drop(self.events);
        join_task(self.task).await
    }

    /// Stop, collect every remaining event and wait for the actor.
    pub async fn finish(mut self) -> Result<(Vec<ServerEvent>, SessionSummary)> {
        // the actor may already be gone; remaining events are still readable
        let _stopped = self.stop().await.is_ok();
        drop(self.input);

        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let summary = join_task(self.task).await?;
        Ok((events, summary))
    }
}

async fn join_task(task: JoinHandle<SessionSummary>) -> Result<SessionSummary> {
    task.await.map_err(|e| SttError::Runtime {
        message: format!("session task failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::MockEngine;

    fn runtime() -> SttRuntime {
        SttRuntime::builder(Config::default(), Arc::new(MockEngine::new("mock")))
            .start()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = Config::default();
        config.scheduler.workers = 0;
        let result = SttRuntime::builder(config, Arc::new(MockEngine::new("mock"))).start();
        assert!(matches!(result, Err(SttError::ConfigInvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let runtime = runtime();
        let a = runtime.open_session(SessionStart::default()).unwrap();
        let b = runtime.open_session(SessionStart::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(runtime.status().active_sessions, 2);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_sample_rate_mismatch_is_rejected() {
        let runtime = runtime();
        let result = runtime.open_session(SessionStart {
            sample_rate: Some(44100),
            ..Default::default()
        });
        assert!(matches!(result, Err(SttError::Audio { .. })));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_snapshot_defaults() {
        let runtime = runtime();
        let status = runtime.status();
        assert_eq!(status.workers, 1);
        assert_eq!(status.depths, QueueDepths::default());
        assert_eq!(status.engine, "mock");
        assert!(status.engine_ready);
        assert_eq!(status.backpressure.cooldown_ms, 220);
        assert!(serde_json::to_string(&status).is_ok());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_event_is_status() {
        let runtime = runtime();
        let mut session = runtime.open_session(SessionStart::default()).unwrap();
        match session.next_event().await {
            Some(ServerEvent::Status { cooldown_ms, .. }) => assert_eq!(cooldown_ms, 220),
            other => panic!("expected status event, got {other:?}"),
        }
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_after_shutdown_begins_is_rejected() {
        let runtime = runtime();
        runtime.scheduler().close();
        assert!(matches!(
            runtime.open_session(SessionStart::default()),
            Err(SttError::Runtime { .. })
        ));
        runtime.shutdown().await;
    }

    #[test]
    fn test_session_start_from_event() {
        let start = SessionStart::from_event(&ClientEvent::Start {
            language: "fr".to_string(),
            sample_rate: Some(16000),
        })
        .unwrap();
        assert_eq!(start.language.as_deref(), Some("fr"));
        assert_eq!(start.sample_rate, Some(16000));
        assert!(SessionStart::from_event(&ClientEvent::Stop).is_none());
    }
}

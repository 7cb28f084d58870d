//! Depth-based backpressure.
//!
//! The level is a pure function of the two queue depths and the configured
//! watermarks. The controller turns levels into scheduling knobs (interim
//! cooldown, tail window, interim pause) and publishes them on a watch
//! channel for sessions and status readers.

use crate::config::{BackpressureConfig, InterimConfig};
use crate::defaults;
use crate::scheduler::{PriorityScheduler, QueueDepths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// System load level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureLevel {
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackpressureLevel::Normal => "normal",
            BackpressureLevel::High => "high",
            BackpressureLevel::Critical => "critical",
        })
    }
}

/// Queue-depth thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub final_hi: usize,
    pub final_crit: usize,
    pub interim_hi: usize,
    pub interim_crit: usize,
}

impl Watermarks {
    pub fn from_config(config: &BackpressureConfig) -> Self {
        Self {
            final_hi: config.final_hi,
            final_crit: config.final_crit,
            interim_hi: config.interim_hi,
            interim_crit: config.interim_crit,
        }
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::from_config(&BackpressureConfig::default())
    }
}

/// Classify queue depths against watermarks.
pub fn classify(depths: QueueDepths, marks: &Watermarks) -> BackpressureLevel {
    if depths.finals >= marks.final_crit || depths.interims >= marks.interim_crit {
        BackpressureLevel::Critical
    } else if depths.finals >= marks.final_hi || depths.interims >= marks.interim_hi {
        BackpressureLevel::High
    } else {
        BackpressureLevel::Normal
    }
}

/// Published scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackpressureStatus {
    pub level: BackpressureLevel,
    pub cooldown_ms: u64,
    pub interim_paused: bool,
    pub tail_seconds: f32,
}

/// Level tracker with optional de-escalation hysteresis.
///
/// Escalation is immediate. Dropping to a calmer level needs
/// `hysteresis_ticks` consecutive calmer observations.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    marks: Watermarks,
    base_cooldown_ms: u64,
    base_tail_seconds: f32,
    backoff_factor: f32,
    hysteresis_ticks: u32,
    level: BackpressureLevel,
    calm_ticks: u32,
}

impl BackpressureController {
    pub fn new(backpressure: &BackpressureConfig, interim: &InterimConfig) -> Self {
        Self {
            marks: Watermarks::from_config(backpressure),
            base_cooldown_ms: interim.cooldown_ms,
            base_tail_seconds: interim.tail_seconds,
            backoff_factor: backpressure.backoff_factor.max(1.0),
            hysteresis_ticks: backpressure.hysteresis_ticks.max(1),
            level: BackpressureLevel::Normal,
            calm_ticks: 0,
        }
    }

    pub fn level(&self) -> BackpressureLevel {
        self.level
    }

    /// Feed one depth sample and return the resulting status.
    pub fn observe(&mut self, depths: QueueDepths) -> BackpressureStatus {
        let raw = classify(depths, &self.marks);
        if raw > self.level {
            self.level = raw;
            self.calm_ticks = 0;
        } else if raw < self.level {
            self.calm_ticks += 1;
            if self.calm_ticks >= self.hysteresis_ticks {
                self.level = raw;
                self.calm_ticks = 0;
            }
        } else {
            self.calm_ticks = 0;
        }
        self.status()
    }

    /// Knobs for the current level.
    pub fn status(&self) -> BackpressureStatus {
        let throttled = (self.base_cooldown_ms as f64 * self.backoff_factor as f64).round() as u64;
        let base = self.base_tail_seconds;
        match self.level {
            BackpressureLevel::Normal => BackpressureStatus {
                level: self.level,
                cooldown_ms: self.base_cooldown_ms,
                interim_paused: false,
                tail_seconds: base,
            },
            BackpressureLevel::High => BackpressureStatus {
                level: self.level,
                cooldown_ms: throttled,
                interim_paused: false,
                tail_seconds: base.min((base * 0.5).max(defaults::HIGH_TAIL_FLOOR_SECONDS)),
            },
            BackpressureLevel::Critical => BackpressureStatus {
                level: self.level,
                cooldown_ms: throttled,
                interim_paused: true,
                tail_seconds: base.min((base * 0.25).max(defaults::CRITICAL_TAIL_FLOOR_SECONDS)),
            },
        }
    }
}

/// Apply a status to the scheduler. Returns the number of interims shed.
pub fn apply(status: &BackpressureStatus, scheduler: &PriorityScheduler) -> usize {
    scheduler.set_interims_paused(status.interim_paused);
    if status.level == BackpressureLevel::Critical {
        scheduler.drop_queued_interims()
    } else {
        0
    }
}

/// Sample the scheduler every `tick` until it closes.
pub fn spawn_controller(
    mut controller: BackpressureController,
    scheduler: Arc<PriorityScheduler>,
    tick: Duration,
    status_tx: watch::Sender<BackpressureStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if scheduler.is_closed() {
                break;
            }

            let depths = scheduler.depths();
            let previous = controller.level();
            let status = controller.observe(depths);

            if status.level != previous {
                tracing::warn!(
                    from = %previous,
                    to = %status.level,
                    finals = depths.finals,
                    interims = depths.interims,
                    cooldown_ms = status.cooldown_ms,
                    "backpressure level changed"
                );
            }

            let shed = apply(&status, &scheduler);
            if shed > 0 {
                tracing::debug!(shed, "dropped queued interims under critical load");
            }

            status_tx.send_if_modified(|current| {
                if *current == status {
                    false
                } else {
                    *current = status;
                    true
                }
            });
        }
        tracing::debug!("backpressure controller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioSnapshot;
    use crate::decode::DecodeProfile;
    use crate::scheduler::{JobClass, JobRequest};
    use crate::session::SessionId;

    fn depths(finals: usize, interims: usize) -> QueueDepths {
        QueueDepths { finals, interims }
    }

    fn controller(hysteresis_ticks: u32) -> BackpressureController {
        let backpressure = BackpressureConfig {
            hysteresis_ticks,
            ..Default::default()
        };
        BackpressureController::new(&backpressure, &InterimConfig::default())
    }

    #[test]
    fn test_classify_table() {
        let marks = Watermarks::default();
        assert_eq!(classify(depths(0, 0), &marks), BackpressureLevel::Normal);
        assert_eq!(classify(depths(5, 19), &marks), BackpressureLevel::Normal);
        assert_eq!(classify(depths(6, 0), &marks), BackpressureLevel::High);
        assert_eq!(classify(depths(0, 20), &marks), BackpressureLevel::High);
        assert_eq!(classify(depths(11, 39), &marks), BackpressureLevel::High);
        assert_eq!(classify(depths(12, 0), &marks), BackpressureLevel::Critical);
        assert_eq!(classify(depths(0, 40), &marks), BackpressureLevel::Critical);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let marks = Watermarks::default();
        for f in 0..15 {
            for i in 0..45 {
                assert_eq!(classify(depths(f, i), &marks), classify(depths(f, i), &marks));
            }
        }
    }

    #[test]
    fn test_final_depth_escalation_scenario() {
        let mut controller = controller(1);

        let status = controller.observe(depths(6, 0));
        assert_eq!(status.level, BackpressureLevel::High);
        assert_eq!(status.cooldown_ms, 440);
        assert!(!status.interim_paused);

        let status = controller.observe(depths(12, 0));
        assert_eq!(status.level, BackpressureLevel::Critical);
        assert!(status.interim_paused);

        let status = controller.observe(depths(0, 0));
        assert_eq!(status.level, BackpressureLevel::Normal);
        assert_eq!(status.cooldown_ms, 220);
        assert!(!status.interim_paused);
    }

    #[test]
    fn test_tail_shrinks_under_load() {
        let mut controller = controller(1);
        assert_eq!(controller.status().tail_seconds, 7.0);
        assert_eq!(controller.observe(depths(6, 0)).tail_seconds, 3.5);
        assert_eq!(controller.observe(depths(12, 0)).tail_seconds, 1.75);
    }

    #[test]
    fn test_tail_floor_never_exceeds_base() {
        let interim = InterimConfig {
            tail_seconds: 2.0,
            ..Default::default()
        };
        let mut controller = BackpressureController::new(&BackpressureConfig::default(), &interim);
        assert_eq!(controller.observe(depths(6, 0)).tail_seconds, 2.0);
        assert_eq!(controller.observe(depths(12, 0)).tail_seconds, 1.5);
    }

    #[test]
    fn test_hysteresis_delays_de_escalation_only() {
        let mut controller = controller(3);

        assert_eq!(controller.observe(depths(12, 0)).level, BackpressureLevel::Critical);
        assert_eq!(controller.observe(depths(0, 0)).level, BackpressureLevel::Critical);
        assert_eq!(controller.observe(depths(0, 0)).level, BackpressureLevel::Critical);
        // a busy tick restarts the count
        assert_eq!(controller.observe(depths(12, 0)).level, BackpressureLevel::Critical);
        assert_eq!(controller.observe(depths(0, 0)).level, BackpressureLevel::Critical);
        assert_eq!(controller.observe(depths(0, 0)).level, BackpressureLevel::Critical);
        assert_eq!(controller.observe(depths(0, 0)).level, BackpressureLevel::Normal);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BackpressureLevel::Critical).unwrap(),
            "\"critical\""
        );
    }

    fn interim(session: u64) -> JobRequest {
        JobRequest {
            class: JobClass::Interim,
            session: SessionId(session),
            snapshot: AudioSnapshot::new(vec![0; 10], 0, 16000),
            sequence: 0,
            utterance: 1,
            profile: DecodeProfile::interim("en"),
        }
    }

    #[test]
    fn test_apply_critical_pauses_and_sheds() {
        let scheduler = PriorityScheduler::new();
        scheduler.enqueue(interim(1));
        scheduler.enqueue(interim(2));

        let mut controller = controller(1);
        let status = controller.observe(depths(12, 0));
        assert_eq!(apply(&status, &scheduler), 2);
        assert!(scheduler.interims_paused());
        assert_eq!(scheduler.depths().interims, 0);

        let status = controller.observe(depths(0, 0));
        assert_eq!(apply(&status, &scheduler), 0);
        assert!(!scheduler.interims_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_task_publishes_and_stops() {
        let scheduler = Arc::new(PriorityScheduler::new());
        let controller = controller(1);
        let (tx, mut rx) = watch::channel(controller.status());
        let handle = spawn_controller(controller, scheduler.clone(), Duration::from_millis(12), tx);

        for session in 0..20 {
            scheduler.enqueue(interim(session));
        }
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().level, BackpressureLevel::High);
        assert_eq!(rx.borrow().cooldown_ms, 440);

        scheduler.close();
        handle.await.unwrap();
    }
}

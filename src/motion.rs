use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::model::{AlertSource, UnixTimeMs};
use crate::orchestrator::AlertOrchestrator;

pub const DEFAULT_THRESHOLD: f64 = 12.0;
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// One accelerometer reading, gravity included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: UnixTimeMs,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: UnixTimeMs) -> Self {
        Self { x, y, z, timestamp }
    }

    /// Platforms may report an axis as absent; it counts as zero.
    pub fn from_axes(
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        timestamp: UnixTimeMs,
    ) -> Self {
        Self::new(
            x.unwrap_or(0.0),
            y.unwrap_or(0.0),
            z.unwrap_or(0.0),
            timestamp,
        )
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionTrigger {
    pub magnitude: f64,
    pub timestamp: UnixTimeMs,
}

/// Raises a trigger when the acceleration magnitude exceeds `threshold`, at
/// most once per `debounce_ms`. No smoothing.
///
/// Sample timestamps are expected to be monotonic. A sample older than the
/// last trigger drops the stale reference instead of suppressing until the
/// clock catches up.
#[derive(Debug, Clone)]
pub struct MotionTriggerHeuristic {
    threshold: f64,
    debounce_ms: u64,
    last_trigger: Option<UnixTimeMs>,
}

impl Default for MotionTriggerHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_DEBOUNCE_MS)
    }
}

impl MotionTriggerHeuristic {
    pub fn new(threshold: f64, debounce_ms: u64) -> Self {
        Self {
            threshold,
            debounce_ms,
            last_trigger: None,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.motion_threshold, config.motion_debounce_ms)
    }

    pub fn last_trigger(&self) -> Option<UnixTimeMs> {
        self.last_trigger
    }

    pub fn observe(&mut self, sample: MotionSample) -> Option<MotionTrigger> {
        let magnitude = sample.magnitude();
        if magnitude <= self.threshold {
            return None;
        }

        if self.last_trigger.is_some_and(|last| sample.timestamp < last) {
            debug!(
                at_ms = sample.timestamp.as_millis(),
                "sample clock went backwards, restarting debounce"
            );
            self.last_trigger = None;
        }

        if let Some(last) = self.last_trigger {
            let elapsed = sample.timestamp.elapsed_since(last);
            if elapsed < self.debounce_ms {
                debug!(magnitude, elapsed_ms = elapsed, "motion spike inside debounce window");
                return None;
            }
        }

        self.last_trigger = Some(sample.timestamp);
        Some(MotionTrigger {
            magnitude,
            timestamp: sample.timestamp,
        })
    }
}

/// Feeds samples through `heuristic` until the sender side closes, firing an
/// AI-sourced SOS for each trigger. Returns the number of triggers raised once
/// every fired SOS has finished.
#[instrument(skip_all)]
pub async fn watch_motion(
    mut samples: mpsc::Receiver<MotionSample>,
    mut heuristic: MotionTriggerHeuristic,
    sos: Arc<AlertOrchestrator>,
) -> usize {
    let mut in_flight = JoinSet::new();
    let mut raised = 0;

    while let Some(sample) = samples.recv().await {
        let Some(trigger) = heuristic.observe(sample) else {
            continue;
        };
        raised += 1;
        info!(
            magnitude = trigger.magnitude,
            at_ms = trigger.timestamp.as_millis(),
            "abnormal movement detected"
        );
        let sos = sos.clone();
        in_flight.spawn(async move { sos.trigger(AlertSource::Ai).await });
    }

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "motion-triggered SOS failed"),
            Err(e) => warn!(error = %e, "motion-triggered SOS task aborted"),
        }
    }
    raised
}

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::capabilities::{
    Capabilities, DeliveryClient, DeliveryError, DeviceEffects, KvKey, PositionOptions, SmsLink,
    StatusSink,
};
use crate::config::{ConfigError, RelayConfig};
use crate::connectivity::{ConnectivityError, ConnectivityMonitor, ReconnectHandler};
use crate::location::{LocationError, LocationProvider};
use crate::model::{AlertPayload, AlertSource};
use crate::outbox::{AlertQueue, DrainReport, QueueError};

const AI_TRIGGER_NOTICE: &str = "AI detected abnormal movement - auto SOS";

/// Progress of one trigger invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    ResolvingLocation,
    Sending,
    Queuing,
    Sent,
    Queued,
    Failed,
}

impl TriggerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Queued | Self::Failed)
    }

    pub fn can_transition_to(self, next: TriggerState) -> bool {
        use TriggerState::*;
        matches!(
            (self, next),
            (Idle | Sent | Queued | Failed, ResolvingLocation)
                | (ResolvingLocation, Sending | Queuing | Failed)
                | (Sending, Sent | Failed)
                | (Queuing, Queued)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Delivered on the live connection.
    Sent,
    /// Stored for the next reconnect; the SMS fallback was opened.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("Error in SOS: {0}")]
    Location(#[from] LocationError),

    #[error("Error in SOS: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("invalid trigger transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TriggerState,
        to: TriggerState,
    },
}

/// Progress texts shown on the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SosStatus {
    GettingLocation,
    Sending,
    Sent,
    SavedOffline,
}

impl fmt::Display for SosStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SosStatus::GettingLocation => "Getting location...",
            SosStatus::Sending => "Sending SOS alert...",
            SosStatus::Sent => "SOS alert sent successfully!",
            SosStatus::SavedOffline => {
                "No internet. SOS saved and will auto-send when you are online."
            }
        })
    }
}

/// Marks a trigger that was dropped before reaching a terminal state as
/// `Failed`, so the next trigger can start.
struct AbandonedTrigger<'a> {
    state: &'a Mutex<TriggerState>,
}

impl Drop for AbandonedTrigger<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.is_terminal() && *state != TriggerState::Idle {
            warn!(state = ?*state, "SOS trigger abandoned before finishing");
            *state = TriggerState::Failed;
        }
    }
}

/// Runs the trigger-to-delivery flow and drains the queue on reconnect.
///
/// Triggers are serialized: a second trigger waits until the first reaches a
/// terminal state. Drains run independently of triggers.
pub struct AlertOrchestrator {
    config: RelayConfig,
    location: LocationProvider,
    connectivity: Arc<ConnectivityMonitor>,
    queue: AlertQueue,
    delivery: Arc<dyn DeliveryClient>,
    device: Arc<dyn DeviceEffects>,
    status: Arc<dyn StatusSink>,
    trigger_lock: tokio::sync::Mutex<()>,
    state: Mutex<TriggerState>,
}

impl AlertOrchestrator {
    pub fn new(
        config: RelayConfig,
        capabilities: Capabilities,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let key = KvKey::new(config.queue_key.as_str())
            .map_err(|e| ConfigError::InvalidQueueKey(e.to_string()))?;
        let options = PositionOptions {
            enable_high_accuracy: config.high_accuracy,
            timeout: Duration::from_millis(config.location_timeout_ms),
        };

        Ok(Self {
            location: LocationProvider::new(capabilities.geolocation, options),
            connectivity,
            queue: AlertQueue::new(capabilities.kv, key),
            delivery: capabilities.delivery,
            device: capabilities.device,
            status: capabilities.status,
            trigger_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(TriggerState::Idle),
            config,
        })
    }

    /// Registers this orchestrator as the monitor's reconnect handler.
    pub fn listen_for_reconnects(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<()>, ConnectivityError> {
        let handle = self.connectivity.listen(self.clone())?;
        info!("reconnect listener started");
        Ok(handle)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// State of the current trigger, or of the last one once it finished.
    pub fn state(&self) -> TriggerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn enter(&self, next: TriggerState) -> Result<(), TriggerError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if !state.can_transition_to(next) {
            return Err(TriggerError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }

    fn show(&self, status: SosStatus) {
        self.status.set_status(&status.to_string());
    }

    /// Marks the trigger failed and surfaces the error to the user.
    fn fail(&self, err: TriggerError) -> TriggerError {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = TriggerState::Failed;
        let message = err.to_string();
        error!(error = %message, "SOS trigger failed");
        self.status.set_status(&message);
        self.status.alert(&message);
        err
    }

    fn sound_alarm(&self) {
        if let Err(e) = self.device.vibrate(&self.config.vibration_pattern_ms) {
            warn!(error = %e, "vibration unavailable");
        }
        if let Err(e) = self.device.play_audio(&self.config.siren_src) {
            warn!(error = %e, src = %self.config.siren_src, "siren playback failed");
        }
    }

    fn open_sms_fallback(&self) {
        let link = SmsLink::new(
            self.config.sms_fallback_number.as_str(),
            self.config.sms_fallback_message.as_str(),
        );
        if let Err(e) = self.device.open_url(&link.to_uri()) {
            warn!(error = %e, number = %link.number(), "could not open SMS fallback");
        }
    }

    /// Runs one SOS trigger to a terminal state.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn trigger(&self, source: AlertSource) -> Result<TriggerOutcome, TriggerError> {
        let _in_flight = self.trigger_lock.lock().await;
        let _abandoned = AbandonedTrigger { state: &self.state };
        // Only one trigger holds the lock, so a leftover state is stale.
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = TriggerState::Idle;

        if source == AlertSource::Ai {
            self.status.alert(AI_TRIGGER_NOTICE);
        }

        self.enter(TriggerState::ResolvingLocation)?;
        self.show(SosStatus::GettingLocation);
        let location = match self.location.get_location().await {
            Ok(location) => location,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.sound_alarm();
        let payload = AlertPayload::now(location, source);

        if self.connectivity.is_online() {
            self.enter(TriggerState::Sending)?;
            self.show(SosStatus::Sending);
            if let Err(e) = self.delivery.send(&payload).await {
                return Err(self.fail(e.into()));
            }
            self.enter(TriggerState::Sent)?;
            self.show(SosStatus::Sent);
            info!("SOS alert sent");
            Ok(TriggerOutcome::Sent)
        } else {
            self.enter(TriggerState::Queuing)?;
            if let Err(e) = self.queue.enqueue(payload).await {
                warn!(error = %e, "could not persist SOS alert while offline");
            }
            self.enter(TriggerState::Queued)?;
            self.show(SosStatus::SavedOffline);
            self.open_sms_fallback();
            info!("SOS alert queued for reconnect");
            Ok(TriggerOutcome::Queued)
        }
    }

    /// Manual SOS button.
    pub async fn trigger_manual(&self) -> Result<TriggerOutcome, TriggerError> {
        self.trigger(AlertSource::Manual).await
    }

    /// Delivers every queued alert; failures stay queued for the next call.
    pub async fn flush_queue(&self) -> Result<DrainReport, QueueError> {
        self.queue.drain(self.delivery.as_ref()).await
    }
}

#[async_trait]
impl ReconnectHandler for AlertOrchestrator {
    async fn on_reconnect(&self) {
        if let Err(e) = self.flush_queue().await {
            warn!(error = %e, "queue drain after reconnect failed");
        }
    }
}

//! Shared core of the SOS relay: resolves a location fix, delivers the alert
//! when online, queues it durably when offline and drains the queue on
//! reconnect. A motion heuristic can raise alerts on its own.
//!
//! Platform services (geolocation, storage, HTTP, vibration/audio, status
//! text) are injected through [`Capabilities`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod connectivity;
pub mod location;
pub mod model;
pub mod motion;
pub mod orchestrator;
pub mod outbox;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capabilities::Capabilities;
pub use config::{ConfigError, RelayConfig};
pub use connectivity::{ConnectivityMonitor, ReconnectHandler, Transition};
pub use location::{LocationError, LocationProvider};
pub use model::{AlertPayload, AlertSource, LatLon, UnixTimeMs};
pub use motion::{watch_motion, MotionSample, MotionTrigger, MotionTriggerHeuristic};
pub use orchestrator::{AlertOrchestrator, SosStatus, TriggerError, TriggerOutcome, TriggerState};
pub use outbox::{AlertQueue, DrainReport, QueueError};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::capabilities::{Geolocation, PositionError, PositionOptions};
use crate::model::LatLon;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("Geolocation not supported")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

impl From<PositionError> for LocationError {
    fn from(e: PositionError) -> Self {
        let message = e.message().trim();
        if message.is_empty() {
            LocationError::Failed("Location error".to_string())
        } else {
            LocationError::Failed(message.to_string())
        }
    }
}

/// Single-shot position fix with a hard timeout. No retries.
pub struct LocationProvider {
    geolocation: Arc<dyn Geolocation>,
    options: PositionOptions,
}

impl LocationProvider {
    pub fn new(geolocation: Arc<dyn Geolocation>, options: PositionOptions) -> Self {
        Self {
            geolocation,
            options,
        }
    }

    pub fn options(&self) -> PositionOptions {
        self.options
    }

    /// The platform is asked to honour `options.timeout`; the same bound is
    /// enforced here in case it does not.
    #[instrument(skip(self))]
    pub async fn get_location(&self) -> Result<LatLon, LocationError> {
        if !self.geolocation.is_supported() {
            return Err(LocationError::Unsupported);
        }

        let timeout: Duration = self.options.timeout;
        let position = tokio::time::timeout(timeout, self.geolocation.current_position(self.options))
            .await
            .map_err(|_| {
                warn!(timeout_ms = timeout.as_millis() as u64, "position request timed out");
                LocationError::Failed("Timeout expired".to_string())
            })??;

        LatLon::new(position.latitude, position.longitude)
            .map_err(|e| LocationError::Failed(e.to_string()))
    }
}

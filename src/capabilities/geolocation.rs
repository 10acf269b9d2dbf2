use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Hints passed through to the platform's one-shot position query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Raw fix as reported by the platform, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    PositionUnavailable(String),
    #[error("{0}")]
    Timeout(String),
}

impl PositionError {
    pub fn message(&self) -> &str {
        match self {
            PositionError::PermissionDenied(m)
            | PositionError::PositionUnavailable(m)
            | PositionError::Timeout(m) => m,
        }
    }
}

/// The platform geolocation service (browser `navigator.geolocation`, Android
/// fused location, ...). Treated as a black box.
#[async_trait]
pub trait Geolocation: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn current_position(&self, options: PositionOptions) -> Result<Position, PositionError>;
}

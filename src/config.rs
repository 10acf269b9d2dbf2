use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::http::ValidatedUrl;
use crate::capabilities::kv::KvKey;
use crate::motion;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unparseable config: {0}")]
    Parse(String),

    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(String),

    #[error("delivery path must start with '/', got {0:?}")]
    InvalidDeliveryPath(String),

    #[error("invalid queue key: {0}")]
    InvalidQueueKey(String),

    #[error("{field} must be > 0")]
    MustBePositive { field: &'static str },

    #[error("motion_threshold must be a finite value > 0, got {0}")]
    InvalidMotionThreshold(String),

    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Every tunable of the relay. `Default` carries the production values; a host
/// can override any subset by deserializing a partial JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backend_base_url: String,
    pub delivery_path: String,
    pub queue_key: String,
    pub location_timeout_ms: u64,
    pub high_accuracy: bool,
    pub motion_threshold: f64,
    pub motion_debounce_ms: u64,
    pub vibration_pattern_ms: Vec<u32>,
    pub siren_src: String,
    pub sms_fallback_number: String,
    pub sms_fallback_message: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend_base_url: "http://localhost:5000".to_string(),
            delivery_path: "/api/sos-offline".to_string(),
            queue_key: "sos_alert_queue".to_string(),
            location_timeout_ms: 10_000,
            high_accuracy: true,
            motion_threshold: motion::DEFAULT_THRESHOLD,
            motion_debounce_ms: motion::DEFAULT_DEBOUNCE_MS,
            vibration_pattern_ms: vec![300, 200, 300, 200, 500],
            siren_src: "/static/siren.mp3".to_string(),
            sms_fallback_number: "100".to_string(),
            sms_fallback_message: "EMERGENCY! I need help. Unable to send internet SOS."
                .to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.backend_base_url.as_str())
            .map_err(|e| ConfigError::InvalidBackendUrl(e.to_string()))?;
        if !self.delivery_path.starts_with('/') {
            return Err(ConfigError::InvalidDeliveryPath(self.delivery_path.clone()));
        }
        KvKey::new(self.queue_key.as_str()).map_err(|e| ConfigError::InvalidQueueKey(e.to_string()))?;
        if self.location_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                field: "location_timeout_ms",
            });
        }
        if self.motion_debounce_ms == 0 {
            return Err(ConfigError::MustBePositive {
                field: "motion_debounce_ms",
            });
        }
        if !self.motion_threshold.is_finite() || self.motion_threshold <= 0.0 {
            return Err(ConfigError::InvalidMotionThreshold(
                self.motion_threshold.to_string(),
            ));
        }
        if self.vibration_pattern_ms.is_empty() {
            return Err(ConfigError::Empty {
                field: "vibration_pattern_ms",
            });
        }
        if self.sms_fallback_number.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "sms_fallback_number",
            });
        }
        Ok(())
    }

    /// Full URL of the alert endpoint.
    pub fn delivery_url(&self) -> Result<ValidatedUrl, ConfigError> {
        let joined = format!(
            "{}{}",
            self.backend_base_url.trim_end_matches('/'),
            self.delivery_path
        );
        ValidatedUrl::new(joined).map_err(|e| ConfigError::InvalidBackendUrl(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            RelayConfig::from_json(r#"{"backend_base_url":"https://sos.example.org"}"#).unwrap();
        assert_eq!(config.backend_base_url, "https://sos.example.org");
        assert_eq!(config.queue_key, "sos_alert_queue");
        assert_eq!(config.motion_debounce_ms, 5_000);
    }

    #[test]
    fn delivery_url_joins_without_double_slash() {
        let config = RelayConfig {
            backend_base_url: "https://sos.example.org/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.delivery_url().unwrap().as_str(),
            "https://sos.example.org/api/sos-offline"
        );
    }

    #[test]
    fn test_config_validation() {
        let bad_url = RelayConfig {
            backend_base_url: "ftp://files.example.org".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_url.validate(),
            Err(ConfigError::InvalidBackendUrl(_))
        ));

        let bad_path = RelayConfig {
            delivery_path: "api/sos".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_path.validate(),
            Err(ConfigError::InvalidDeliveryPath(_))
        ));

        let bad_threshold = RelayConfig {
            motion_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            bad_threshold.validate(),
            Err(ConfigError::InvalidMotionThreshold(_))
        ));

        let zero_debounce = RelayConfig {
            motion_debounce_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_debounce.validate(),
            Err(ConfigError::MustBePositive { .. })
        ));

        let no_number = RelayConfig {
            sms_fallback_number: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(no_number.validate(), Err(ConfigError::Empty { .. })));
    }
}

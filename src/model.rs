use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

/// Validated geographic coordinates
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLatLon")]
pub struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawLatLon {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawLatLon> for LatLon {
    type Error = CoordinateError;

    fn try_from(raw: RawLatLon) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lon)
    }
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// Who raised the alert: the user pressing the SOS button, or the motion heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Manual,
    Ai,
}

impl AlertSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSource::Manual => "manual",
            AlertSource::Ai => "ai",
        }
    }
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire and storage shape of one SOS alert.
///
/// Serializes to `{"location":{"lat":..,"lon":..},"source":"manual"|"ai","timestamp":"<ISO-8601>"}`,
/// which is both the request body sent to the backend and the element type of the
/// persisted queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    location: LatLon,
    source: AlertSource,
    timestamp: DateTime<Utc>,
}

impl AlertPayload {
    pub fn new(location: LatLon, source: AlertSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            location,
            source,
            timestamp,
        }
    }

    /// Stamps the payload with the current wall-clock time.
    pub fn now(location: LatLon, source: AlertSource) -> Self {
        Self::new(location, source, Utc::now())
    }

    pub fn location(&self) -> LatLon {
        self.location
    }

    pub fn source(&self) -> AlertSource {
        self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        )
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn latlon_rejects_nan_and_infinity() {
        assert_eq!(LatLon::new(f64::NAN, 0.0), Err(CoordinateError::NonFinite));
        assert_eq!(
            LatLon::new(0.0, f64::INFINITY),
            Err(CoordinateError::NonFinite)
        );
    }

    #[test]
    fn latlon_rejects_out_of_range() {
        assert!(LatLon::new(91.0, 0.0).is_err());
        assert!(LatLon::new(-91.0, 0.0).is_err());
        assert!(LatLon::new(0.0, 181.0).is_err());
        assert!(LatLon::new(0.0, -181.0).is_err());
    }

    #[test]
    fn latlon_accepts_bounds() {
        assert!(LatLon::new(90.0, 180.0).is_ok());
        assert!(LatLon::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn payload_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let payload = AlertPayload::new(LatLon::new(1.0, 2.0).unwrap(), AlertSource::Manual, ts);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["location"]["lat"], 1.0);
        assert_eq!(value["location"]["lon"], 2.0);
        assert_eq!(value["source"], "manual");
        assert_eq!(value["timestamp"], "2024-03-01T12:30:00Z");
    }

    #[test]
    fn payload_accepts_browser_iso_timestamp() {
        let json = r#"{"location":{"lat":10.5,"lon":-3.25},"source":"ai","timestamp":"2024-03-01T12:30:00.123Z"}"#;
        let payload: AlertPayload = serde_json::from_str(json).unwrap();

        assert_eq!(payload.source(), AlertSource::Ai);
        assert_eq!(payload.location().lat(), 10.5);
        assert_eq!(payload.timestamp().timestamp_subsec_millis(), 123);
    }

    #[test]
    fn payload_rejects_invalid_coordinates_on_decode() {
        let json = r#"{"location":{"lat":120.0,"lon":0.0},"source":"ai","timestamp":"2024-03-01T12:30:00Z"}"#;
        assert!(serde_json::from_str::<AlertPayload>(json).is_err());
    }

    #[test]
    fn unix_time_elapsed_saturates() {
        assert_eq!(UnixTimeMs(10).elapsed_since(UnixTimeMs(4)), 6);
        assert_eq!(UnixTimeMs(4).elapsed_since(UnixTimeMs(10)), 0);
    }
}

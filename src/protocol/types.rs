//! # Telemetry Data Model
//!
//! In-memory representation of one payload frame. Every sensor section is
//! optional: a missing section is a normal outcome, never a rejected record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GPS position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// GPS altitude in meters
    pub altitude: Option<f64>,

    /// Number of satellites in view
    pub satellites: Option<u32>,

    /// Fix time as reported by the receiver (e.g. "12:00:05")
    pub fix_time: Option<String>,
}

/// Barometric environment sensor readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Temperature in °C
    pub temperature: Option<f64>,

    /// Pressure in Pa
    pub pressure: Option<f64>,

    /// Relative humidity in %
    pub humidity: Option<f64>,

    /// Barometric altitude in meters
    pub baro_altitude: Option<f64>,
}

/// Air quality sensor readings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirQuality {
    /// Air quality index (1 = excellent .. 5 = unhealthy)
    pub index: Option<u32>,

    /// Total volatile organic compounds in ppb
    pub tvoc: Option<u32>,

    /// Equivalent CO2 in ppm
    pub eco2: Option<u32>,
}

impl AirQuality {
    /// Human-readable label for the air quality index
    pub fn label(&self) -> &'static str {
        match self.index {
            Some(1) => "Excellent",
            Some(2) => "Good",
            Some(3) => "Moderate",
            Some(4) => "Poor",
            Some(5) => "Unhealthy",
            _ => "Unknown",
        }
    }
}

/// Particulate matter concentrations (standard particles, µg/m³)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Particulate {
    pub pm1: Option<u32>,
    pub pm2_5: Option<u32>,
    pub pm10: Option<u32>,
}

/// One reconstructed telemetry frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Ground-station arrival time
    pub timestamp: DateTime<Utc>,

    pub gps: Option<GpsFix>,
    pub environment: Option<Environment>,
    pub air_quality: Option<AirQuality>,

    /// Ozone concentration in ppb
    pub ozone: Option<u32>,

    /// UV index
    pub uv_index: Option<f64>,

    pub particulate: Option<Particulate>,

    /// Radio RSSI in dBm from the preceding side-channel report
    pub rssi: Option<i32>,

    /// Radio SNR in dB from the preceding side-channel report
    pub snr: Option<f32>,

    /// Ground speed derived from consecutive fixes, km/h
    pub speed_kmh: Option<f64>,

    /// Latched link error still in effect when this record was published
    pub error: Option<String>,
}

impl TelemetryRecord {
    /// Create an empty record stamped with `timestamp`
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            gps: None,
            environment: None,
            air_quality: None,
            ozone: None,
            uv_index: None,
            particulate: None,
            rssi: None,
            snr: None,
            speed_kmh: None,
            error: None,
        }
    }

    /// Whether any non-GPS sensor field carries a value
    pub fn has_sensor_data(&self) -> bool {
        self.environment.is_some()
            || self.air_quality.is_some()
            || self.ozone.is_some()
            || self.uv_index.is_some()
            || self.particulate.is_some()
    }
}

/// Physical link state as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Receiving,
    Error(String),
}

impl LinkStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, LinkStatus::Error(_))
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Receiving => write!(f, "receiving"),
            LinkStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Side-channel radio quality report (`RSSI: <int> | SNR: <float>`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReport {
    pub rssi: i32,
    pub snr: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_quality_labels() {
        let labels: Vec<&str> = (0..=6)
            .map(|i| AirQuality { index: Some(i), ..Default::default() }.label())
            .collect();
        assert_eq!(
            labels,
            vec!["Unknown", "Excellent", "Good", "Moderate", "Poor", "Unhealthy", "Unknown"]
        );
        assert_eq!(AirQuality::default().label(), "Unknown");
    }

    #[test]
    fn test_empty_record_has_no_sensor_data() {
        let mut record = TelemetryRecord::new(Utc::now());
        assert!(!record.has_sensor_data());

        record.rssi = Some(-80);
        record.gps = Some(GpsFix {
            latitude: 45.0,
            longitude: 5.0,
            altitude: None,
            satellites: None,
            fix_time: None,
        });
        assert!(!record.has_sensor_data(), "GPS and RSSI are not sensor data");

        record.ozone = Some(30);
        assert!(record.has_sensor_data());
    }

    #[test]
    fn test_link_status_serialization() {
        let json = serde_json::to_string(&LinkStatus::Connected).unwrap();
        assert_eq!(json, r#"{"status":"connected"}"#);

        let json = serde_json::to_string(&LinkStatus::Error("port busy".into())).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"port busy"}"#);
    }

    #[test]
    fn test_link_status_display() {
        assert_eq!(LinkStatus::Receiving.to_string(), "receiving");
        assert_eq!(LinkStatus::Error("x".into()).to_string(), "error: x");
    }
}

//! # Derived Motion Metrics
//!
//! Ground speed from consecutive GPS fixes, and observer-to-balloon distance.

use chrono::{DateTime, Utc};

use crate::protocol::types::{GpsFix, TelemetryRecord};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Fix intervals shorter than this reuse the previous speed
pub const MIN_SPEED_INTERVAL_S: f64 = 0.5;

/// Great-circle distance in meters between two positions in degrees
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Last fix used for speed computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub speed_kmh: f64,
}

/// Ground speed estimator
///
/// Holds a single previous-fix slot; no history is kept.
#[derive(Debug, Default)]
pub struct SpeedEstimator {
    previous: Option<PreviousFix>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speed in km/h for a fix observed at `at`
    ///
    /// The first fix yields 0. Fixes closer than half a second to the stored
    /// one return the stored speed and leave the slot untouched.
    pub fn update(&mut self, latitude: f64, longitude: f64, at: DateTime<Utc>) -> f64 {
        let Some(prev) = self.previous else {
            self.previous = Some(PreviousFix {
                latitude,
                longitude,
                timestamp: at,
                speed_kmh: 0.0,
            });
            return 0.0;
        };

        let elapsed_s = (at - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed_s < MIN_SPEED_INTERVAL_S {
            return prev.speed_kmh;
        }

        let distance_m = haversine_m(prev.latitude, prev.longitude, latitude, longitude);
        let speed_kmh = round2(distance_m / elapsed_s * 3.6);

        self.previous = Some(PreviousFix {
            latitude,
            longitude,
            timestamp: at,
            speed_kmh,
        });
        speed_kmh
    }

    /// Set `speed_kmh` on a record that carries a fix
    ///
    /// Records without a fix keep `speed_kmh = None` and the stored fix is
    /// not touched.
    pub fn enrich(&mut self, record: &mut TelemetryRecord) {
        record.speed_kmh = match &record.gps {
            Some(GpsFix { latitude, longitude, .. }) => {
                Some(self.update(*latitude, *longitude, record.timestamp))
            }
            None => None,
        };
    }

    pub fn previous(&self) -> Option<&PreviousFix> {
        self.previous.as_ref()
    }
}

/// Distance in km from an observer position to the record's fix
///
/// Rounded to 2 decimals; `None` when the record has no fix.
pub fn distance_to_observer_km(record: &TelemetryRecord, latitude: f64, longitude: f64) -> Option<f64> {
    let fix = record.gps.as_ref()?;
    Some(round2(haversine_m(latitude, longitude, fix.latitude, fix.longitude) / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn record_at(at: DateTime<Utc>, fix: Option<(f64, f64)>) -> TelemetryRecord {
        let mut record = TelemetryRecord::new(at);
        record.gps = fix.map(|(latitude, longitude)| GpsFix {
            latitude,
            longitude,
            altitude: None,
            satellites: None,
            fix_time: None,
        });
        record
    }

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_m(45.0, 5.0, 45.0, 5.0), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of arc on a 6371 km sphere
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.93).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = haversine_m(48.85, 2.35, 51.5, -0.12);
        let b = haversine_m(51.5, -0.12, 48.85, 2.35);
        assert!((a - b).abs() < 1e-6);
        assert!((a - 343_500.0).abs() < 5_000.0, "Paris-London is about 343 km, got {}", a);
    }

    #[test]
    fn test_first_fix_speed_is_zero() {
        let mut est = SpeedEstimator::new();
        assert_eq!(est.update(45.0, 5.0, t0()), 0.0);
        assert_eq!(est.previous().unwrap().latitude, 45.0);
    }

    #[test]
    fn test_speed_from_two_fixes() {
        let mut est = SpeedEstimator::new();
        est.update(0.0, 0.0, t0());
        let speed = est.update(0.0, 0.001, t0() + Duration::seconds(10));

        let expected = haversine_m(0.0, 0.0, 0.0, 0.001) / 10.0 * 3.6;
        assert!((speed - expected).abs() < 0.01, "{} vs {}", speed, expected);
        assert!((speed - 40.03).abs() < 0.01);
        assert_eq!(est.previous().unwrap().speed_kmh, speed);
    }

    #[test]
    fn test_short_interval_returns_previous_speed() {
        let mut est = SpeedEstimator::new();
        est.update(0.0, 0.0, t0());
        let speed = est.update(0.0, 0.001, t0() + Duration::seconds(10));

        let stored = *est.previous().unwrap();
        let again = est.update(0.0, 0.5, t0() + Duration::milliseconds(10_300));
        assert_eq!(again, speed);
        assert_eq!(*est.previous().unwrap(), stored, "slot must not move");
    }

    #[test]
    fn test_clock_going_backwards_returns_previous_speed() {
        let mut est = SpeedEstimator::new();
        est.update(1.0, 1.0, t0());
        assert_eq!(est.update(1.0, 1.1, t0() - Duration::seconds(5)), 0.0);
    }

    #[test]
    fn test_speed_is_rounded_to_two_decimals() {
        let mut est = SpeedEstimator::new();
        est.update(10.0, 10.0, t0());
        let speed = est.update(10.0123, 10.0456, t0() + Duration::seconds(7));
        assert_eq!(speed, (speed * 100.0).round() / 100.0);
    }

    #[test]
    fn test_enrich_without_fix_leaves_slot() {
        let mut est = SpeedEstimator::new();
        let mut with_fix = record_at(t0(), Some((45.0, 5.0)));
        est.enrich(&mut with_fix);
        assert_eq!(with_fix.speed_kmh, Some(0.0));

        let mut without = record_at(t0() + Duration::seconds(5), None);
        est.enrich(&mut without);
        assert_eq!(without.speed_kmh, None);
        assert_eq!(est.previous().unwrap().timestamp, t0());
    }

    #[test]
    fn test_distance_to_observer() {
        let record = record_at(t0(), Some((1.0, 0.0)));
        assert_eq!(distance_to_observer_km(&record, 0.0, 0.0), Some(111.19));
        assert_eq!(distance_to_observer_km(&record_at(t0(), None), 0.0, 0.0), None);
    }
}

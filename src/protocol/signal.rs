//! Side-channel radio quality reports.
//!
//! The receiver prints `RSSI: <int> | SNR: <float>` on its own line before the
//! frame it measured.

use super::types::SignalReport;
use crate::error::{Result, TelemetryError};

/// Parse a side-channel line that starts with `prefix`
///
/// RSSI is required; a missing or unreadable SNR leaves it absent.
pub fn parse_signal_report(line: &str, prefix: &str) -> Result<SignalReport> {
    let body = line.strip_prefix(prefix).ok_or_else(|| {
        TelemetryError::FrameDecode(format!("signal report without {} marker", prefix))
    })?;

    let mut parts = body.split('|');
    let rssi_text = parts.next().unwrap_or_default().trim();
    let rssi = rssi_text.parse::<i32>().map_err(|e| {
        TelemetryError::FrameDecode(format!("invalid RSSI '{}': {}", rssi_text, e))
    })?;

    let snr = parts
        .filter_map(|part| part.trim().strip_prefix("SNR:"))
        .find_map(|value| value.trim().parse::<f32>().ok());

    Ok(SignalReport { rssi, snr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_report() {
        let report = parse_signal_report("RSSI: -87 | SNR: 9.75", "RSSI:").unwrap();
        assert_eq!(report.rssi, -87);
        assert_eq!(report.snr, Some(9.75));
    }

    #[test]
    fn test_rssi_only() {
        let report = parse_signal_report("RSSI: -120", "RSSI:").unwrap();
        assert_eq!(report, SignalReport { rssi: -120, snr: None });
    }

    #[test]
    fn test_bad_snr_is_absent() {
        let report = parse_signal_report("RSSI: -60 | SNR: n/a", "RSSI:").unwrap();
        assert_eq!(report.snr, None);
    }

    #[test]
    fn test_bad_rssi_is_decode_error() {
        let result = parse_signal_report("RSSI: -6x | SNR: 1.0", "RSSI:");
        assert!(matches!(result, Err(TelemetryError::FrameDecode(_))));
    }
}

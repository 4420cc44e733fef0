//! # Line Framer
//!
//! Turns the raw serial byte stream into newline-delimited lines and sorts
//! them into telemetry frames, side-channel signal reports, or noise.
//!
//! Reads from the receiver arrive in arbitrary chunks, so the framer keeps the
//! trailing incomplete segment until its terminator shows up.

use bytes::{Bytes, BytesMut};
use tracing::warn;

use super::signal::parse_signal_report;
use super::types::SignalReport;
use crate::error::{Result, TelemetryError};

/// Line terminator emitted by the receiver
pub const LINE_TERMINATOR: u8 = b'\n';

/// Accumulates bytes and yields complete lines
///
/// Yielded segments keep their terminator: concatenating every yielded
/// segment with [`LineFramer::remainder`] gives back exactly the bytes pushed
/// so far, as long as no line ever exceeded the length limit. Longer lines,
/// terminated or not, are discarded and counted.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_line_length: usize,
    overflows: u64,
}

impl LineFramer {
    /// Create a framer that discards lines longer than `max_line_length`
    ///
    /// The limit excludes the terminator.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line_length.min(4096)),
            max_line_length,
            overflows: 0,
        }
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
            let line = self.buffer.split_to(pos + 1).freeze();
            if pos > self.max_line_length {
                warn!("Discarding {} byte line over the length limit", line.len());
                self.overflows += 1;
                continue;
            }
            lines.push(line);
        }

        if self.buffer.len() > self.max_line_length {
            warn!(
                "Discarding {} buffered bytes without line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
            self.overflows += 1;
        }

        lines
    }

    /// Bytes still waiting for a terminator
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial line (used after the link is reopened)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of lines, complete or partial, discarded for length
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }
}

/// Permissive byte-to-text decoding
///
/// Invalid UTF-8 sequences are dropped, and surrounding whitespace including
/// the `\r\n` terminator is trimmed.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}

/// A line recognised by its marker
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Candidate telemetry frame, marker stripped
    Telemetry(String),
    /// Side-channel radio quality report
    Signal(SignalReport),
}

/// Sorts decoded lines by their leading marker
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    frame_prefix: String,
    signal_prefix: String,
}

impl FrameClassifier {
    pub fn new(frame_prefix: impl Into<String>, signal_prefix: impl Into<String>) -> Self {
        Self {
            frame_prefix: frame_prefix.into(),
            signal_prefix: signal_prefix.into(),
        }
    }

    /// Decode and classify one raw line
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::FrameDecode`] for empty lines, lines without a
    /// known marker, and unreadable signal reports. Callers drop those lines.
    pub fn classify(&self, raw: &[u8]) -> Result<Frame> {
        let line = decode_line(raw);
        if line.is_empty() {
            return Err(TelemetryError::FrameDecode("empty line".to_string()));
        }

        if line.starts_with(&self.signal_prefix) {
            return parse_signal_report(&line, &self.signal_prefix).map(Frame::Signal);
        }

        match line.strip_prefix(self.frame_prefix.as_str()) {
            Some(body) if !body.trim().is_empty() => Ok(Frame::Telemetry(body.trim().to_string())),
            Some(_) => Err(TelemetryError::FrameDecode("frame marker without payload".to_string())),
            None => Err(TelemetryError::FrameDecode(format!("unrecognised line: {}", line))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "Donnees brutes: ";

    fn classifier() -> FrameClassifier {
        FrameClassifier::new(PREFIX, "RSSI:")
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new(4096);
        let lines = framer.push(b"OZ,12\n");
        assert_eq!(lines, vec![Bytes::from_static(b"OZ,12\n")]);
        assert!(framer.remainder().is_empty());
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut framer = LineFramer::new(4096);
        assert!(framer.push(b"GPS,45.1,").is_empty());
        assert_eq!(framer.remainder(), b"GPS,45.1,");

        let lines = framer.push(b"5.2\r\nUV,");
        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"GPS,45.1,5.2\r\n");
        assert_eq!(framer.remainder(), b"UV,");
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut framer = LineFramer::new(4096);
        let lines = framer.push(b"a\nb\n\nc");
        assert_eq!(lines.len(), 3);
        assert_eq!(&lines[2][..], b"\n");
        assert_eq!(framer.remainder(), b"c");
    }

    #[test]
    fn test_concatenation_reproduces_stream() {
        let stream: &[u8] =
            b"Donnees brutes: GPS,NO_FIX|OZ,3\r\nRSSI: -90 | SNR: 7.25\n\xff\xfegarbage\npartial";

        for chunk_size in 1..=stream.len() {
            let mut framer = LineFramer::new(4096);
            let mut rebuilt = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                for line in framer.push(chunk) {
                    rebuilt.extend_from_slice(&line);
                }
            }
            rebuilt.extend_from_slice(framer.remainder());
            assert_eq!(rebuilt, stream, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_overflow_guard_discards_partial_line() {
        let mut framer = LineFramer::new(64);
        assert!(framer.push(&[b'x'; 65]).is_empty());
        assert!(framer.remainder().is_empty());
        assert_eq!(framer.overflow_count(), 1);

        let lines = framer.push(b"ok\n");
        assert_eq!(&lines[0][..], b"ok\n");
    }

    #[test]
    fn test_terminated_line_over_limit_is_discarded() {
        let mut framer = LineFramer::new(64);
        let mut data = vec![b'y'; 221];
        data.extend_from_slice(b"\nshort\n");
        data.extend_from_slice(&[b'z'; 64]);
        data.push(b'\n');

        let lines = framer.push(&data);
        assert_eq!(lines.len(), 2);
        assert_eq!(&lines[0][..], b"short\n");
        assert_eq!(lines[1].len(), 65);
        assert_eq!(framer.overflow_count(), 1);
    }

    #[test]
    fn test_clear_drops_partial_line() {
        let mut framer = LineFramer::new(4096);
        framer.push(b"stale");
        framer.clear();
        let lines = framer.push(b"fresh\n");
        assert_eq!(&lines[0][..], b"fresh\n");
    }

    #[test]
    fn test_decode_drops_invalid_sequences() {
        assert_eq!(decode_line(b"OZ,\xff12\r\n"), "OZ,12");
        assert_eq!(decode_line(b"  \r\n"), "");
    }

    #[test]
    fn test_classify_telemetry_frame() {
        let frame = classifier()
            .classify(b"Donnees brutes: GPS,NO_FIX|OZ,3\r\n")
            .unwrap();
        assert_eq!(frame, Frame::Telemetry("GPS,NO_FIX|OZ,3".to_string()));
    }

    #[test]
    fn test_classify_signal_report() {
        let frame = classifier().classify(b"RSSI: -91 | SNR: 6.50\n").unwrap();
        assert_eq!(
            frame,
            Frame::Signal(SignalReport { rssi: -91, snr: Some(6.5) })
        );
    }

    #[test]
    fn test_classify_discards_other_lines() {
        let c = classifier();
        assert!(matches!(c.classify(b"LoRa init OK\n"), Err(TelemetryError::FrameDecode(_))));
        assert!(matches!(c.classify(b"\r\n"), Err(TelemetryError::FrameDecode(_))));
        assert!(matches!(c.classify(b"Donnees brutes:   \n"), Err(TelemetryError::FrameDecode(_))));
        assert!(matches!(c.classify(b"RSSI: loud\n"), Err(TelemetryError::FrameDecode(_))));
    }

    #[test]
    fn test_empty_frame_prefix_accepts_any_line() {
        let c = FrameClassifier::new("", "RSSI:");
        assert_eq!(
            c.classify(b"UV,3.5\n").unwrap(),
            Frame::Telemetry("UV,3.5".to_string())
        );
    }
}

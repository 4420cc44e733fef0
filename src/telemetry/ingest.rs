//! # Ingestion Loop
//!
//! The single producer task. Reads bytes from the link, frames and parses
//! them, enriches each record and publishes it to the store and the sink.
//!
//! Nothing in here is fatal: link failures reconnect, garbled lines are
//! dropped, and a failing sink only loses its own writes.

use chrono::Utc;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::protocol::framer::{Frame, FrameClassifier, LineFramer};
use crate::protocol::parser::FieldParser;
use crate::protocol::types::SignalReport;
use crate::serial::port_trait::LinkOpener;
use crate::serial::{LinkManager, LinkTimings, PollOutcome};
use crate::shutdown::Shutdown;
use crate::telemetry::motion::SpeedEstimator;
use crate::telemetry::sink::SinkHandle;
use crate::telemetry::store::TelemetryStore;
use std::time::Duration;

/// Counters for one ingestion run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub bytes: u64,
    pub frames: u64,
    pub signal_reports: u64,
    pub rejected_lines: u64,
    /// Lines discarded for exceeding the framer's length limit
    pub oversized_lines: u64,
    pub reconnects: u64,
    /// Records the sink queue refused
    pub sink_dropped: u64,
}

/// Producer pipeline from link bytes to published records
pub struct Ingestor<O: LinkOpener> {
    link: LinkManager<O>,
    framer: LineFramer,
    classifier: FrameClassifier,
    parser: FieldParser,
    speed: SpeedEstimator,
    store: TelemetryStore,
    sink: Option<SinkHandle>,
    pending_signal: Option<SignalReport>,
    read_buffer_size: usize,
    drain_timeout: Duration,
    shutdown: Shutdown,
    stats: IngestStats,
}

impl<O: LinkOpener> Ingestor<O> {
    /// Build the pipeline from the loaded configuration
    pub fn new(
        config: &Config,
        opener: O,
        store: TelemetryStore,
        sink: Option<SinkHandle>,
        shutdown: Shutdown,
    ) -> Self {
        let link = LinkManager::new(
            opener,
            store.clone(),
            LinkTimings::from_config(&config.serial),
            shutdown.clone(),
        );

        Self {
            link,
            framer: LineFramer::new(config.protocol.max_line_length),
            classifier: FrameClassifier::new(
                config.protocol.frame_prefix.clone(),
                config.protocol.signal_prefix.clone(),
            ),
            parser: FieldParser::new(config.protocol.on_conversion_failure),
            speed: SpeedEstimator::new(),
            store,
            sink,
            pending_signal: None,
            read_buffer_size: config.serial.read_buffer_size.max(1),
            drain_timeout: config.persistence.drain_timeout(),
            shutdown,
            stats: IngestStats::default(),
        }
    }

    /// Run until the stop flag is raised, then close the link and drain the sink
    pub async fn run(mut self) -> IngestStats {
        info!("Ingestion started");
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut first_connect = true;

        while !self.shutdown.is_triggered() {
            if !self.link.is_open() {
                if !first_connect {
                    self.stats.reconnects += 1;
                }
                first_connect = false;

                self.framer.clear();
                self.pending_signal = None;
                if !self.link.connect().await {
                    break;
                }
            }

            match self.link.poll(&mut buf).await {
                PollOutcome::Data(n) => self.handle_bytes(&buf[..n]),
                PollOutcome::Idle | PollOutcome::Failed => {}
                PollOutcome::Stopped => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                }
            }
        }

        self.link.shutdown();
        if let Some(sink) = self.sink.take() {
            self.stats.sink_dropped = sink.dropped();
            sink.close(self.drain_timeout).await;
        }

        info!(
            "Ingestion stopped: {} frames, {} signal reports, {} rejected lines, {} oversized lines, {} reconnects, {} records not logged",
            self.stats.frames,
            self.stats.signal_reports,
            self.stats.rejected_lines,
            self.stats.oversized_lines,
            self.stats.reconnects,
            self.stats.sink_dropped
        );
        self.stats
    }

    /// Feed one chunk of link bytes through framing, parsing and publication
    pub fn handle_bytes(&mut self, data: &[u8]) {
        self.stats.bytes += data.len() as u64;
        let lines = self.framer.push(data);
        self.stats.oversized_lines = self.framer.overflow_count();
        for line in lines {
            match self.classifier.classify(&line) {
                Ok(Frame::Telemetry(body)) => self.handle_frame(&body),
                Ok(Frame::Signal(report)) => {
                    trace!("Signal report rssi={} snr={:?}", report.rssi, report.snr);
                    self.stats.signal_reports += 1;
                    self.pending_signal = Some(report);
                }
                Err(e) => {
                    self.stats.rejected_lines += 1;
                    debug!("Dropping line: {}", e);
                }
            }
        }
    }

    fn handle_frame(&mut self, body: &str) {
        let parsed = self.parser.parse(body, Utc::now());
        let mut record = parsed.record;

        if let Some(signal) = self.pending_signal.take() {
            record.rssi = Some(signal.rssi);
            record.snr = signal.snr;
        }
        self.speed.enrich(&mut record);

        let record = self.store.publish_record(record, parsed.has_sensor_data);
        self.stats.frames += 1;
        self.link.mark_receiving();

        if let Some(sink) = self.sink.as_mut() {
            sink.submit(record);
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }
}

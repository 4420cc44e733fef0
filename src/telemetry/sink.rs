//! # Persistence Sink
//!
//! Durable append-only record log in JSON Lines format with rotation.
//!
//! This module handles:
//! - Flattening finalized records into nullable scalar rows
//! - Writing rows to `telemetry_NNNNNN.jsonl` segments
//! - Rotating segments after N records and retaining the last M files
//! - Running the writer off the ingestion path on a blocking task

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{Result, TelemetryError};
use crate::protocol::types::TelemetryRecord;

/// Segment file name prefix
pub const SEGMENT_PREFIX: &str = "telemetry_";

/// Segment file extension
pub const SEGMENT_EXTENSION: &str = "jsonl";

/// One persisted row: every sensor field as a nullable scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    /// ISO-8601 arrival time (UTC)
    pub timestamp: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_gps: Option<f64>,
    pub satellites: Option<u32>,
    pub gps_time: Option<String>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub altitude_baro: Option<f64>,
    pub air_quality: Option<u32>,
    pub air_quality_label: Option<String>,
    pub tvoc: Option<u32>,
    pub eco2: Option<u32>,
    pub ozone: Option<u32>,
    pub uv_index: Option<f64>,
    pub pm1: Option<u32>,
    pub pm25: Option<u32>,
    pub pm10: Option<u32>,
    pub rssi: Option<i32>,
    pub snr: Option<f32>,
    pub speed_kmh: Option<f64>,
    pub error: Option<String>,
}

impl FlatRecord {
    /// Column names in serialization order
    pub const COLUMNS: &'static [&'static str] = &[
        "timestamp",
        "latitude",
        "longitude",
        "altitude_gps",
        "satellites",
        "gps_time",
        "temperature",
        "pressure",
        "humidity",
        "altitude_baro",
        "air_quality",
        "air_quality_label",
        "tvoc",
        "eco2",
        "ozone",
        "uv_index",
        "pm1",
        "pm25",
        "pm10",
        "rssi",
        "snr",
        "speed_kmh",
        "error",
    ];
}

impl From<&TelemetryRecord> for FlatRecord {
    fn from(r: &TelemetryRecord) -> Self {
        let gps = r.gps.as_ref();
        let env = r.environment.as_ref();
        let air = r.air_quality.as_ref();
        let pm = r.particulate.as_ref();

        Self {
            timestamp: r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            latitude: gps.map(|g| g.latitude),
            longitude: gps.map(|g| g.longitude),
            altitude_gps: gps.and_then(|g| g.altitude),
            satellites: gps.and_then(|g| g.satellites),
            gps_time: gps.and_then(|g| g.fix_time.clone()),
            temperature: env.and_then(|e| e.temperature),
            pressure: env.and_then(|e| e.pressure),
            humidity: env.and_then(|e| e.humidity),
            altitude_baro: env.and_then(|e| e.baro_altitude),
            air_quality: air.and_then(|a| a.index),
            air_quality_label: air.filter(|a| a.index.is_some()).map(|a| a.label().to_string()),
            tvoc: air.and_then(|a| a.tvoc),
            eco2: air.and_then(|a| a.eco2),
            ozone: r.ozone,
            uv_index: r.uv_index,
            pm1: pm.and_then(|p| p.pm1),
            pm25: pm.and_then(|p| p.pm2_5),
            pm10: pm.and_then(|p| p.pm10),
            rssi: r.rssi,
            snr: r.snr,
            speed_kmh: r.speed_kmh,
            error: r.error.clone(),
        }
    }
}

/// Destination for finalized records
#[cfg_attr(test, mockall::automock)]
pub trait RecordSink: Send {
    /// Append one row to the log
    fn append(&mut self, record: &FlatRecord) -> Result<()>;

    /// Push buffered rows to durable storage
    fn flush(&mut self) -> Result<()>;
}

/// Rotating JSON Lines record log
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_index: Option<u32>,
    next_index: u32,
    records_in_file: usize,
}

impl JsonlSink {
    /// Open the log directory, resuming after the newest existing segment
    ///
    /// Existing segments are never reopened for writing.
    pub fn open<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let next_index = Self::segment_paths(&dir)?
            .last()
            .map(|(index, _)| index + 1)
            .unwrap_or(1);

        info!(
            "Record log at {} (next segment {})",
            dir.display(),
            Self::segment_name(next_index)
        );

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep,
            writer: None,
            current_index: None,
            next_index,
            records_in_file: 0,
        })
    }

    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        Self::open(&config.log_dir, config.max_records_per_file, config.max_files_to_keep)
    }

    /// File name of segment `index`
    pub fn segment_name(index: u32) -> String {
        format!("{}{:06}.{}", SEGMENT_PREFIX, index, SEGMENT_EXTENSION)
    }

    fn parse_segment_index(name: &str) -> Option<u32> {
        name.strip_prefix(SEGMENT_PREFIX)?
            .strip_suffix(SEGMENT_EXTENSION)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    /// All segments in `dir`, oldest first
    ///
    /// A missing directory has no segments.
    pub fn segment_paths<P: AsRef<Path>>(dir: P) -> Result<Vec<(u32, PathBuf)>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(Self::parse_segment_index) {
                segments.push((index, entry.path()));
            }
        }
        segments.sort_by_key(|(index, _)| *index);
        Ok(segments)
    }

    /// Segment currently being written, if any
    pub fn current_segment(&self) -> Option<PathBuf> {
        self.current_index
            .map(|index| self.dir.join(Self::segment_name(index)))
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let index = self.next_index;
        let path = self.dir.join(Self::segment_name(index));
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        debug!("Opened record segment {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_index = Some(index);
        self.next_index = index + 1;
        self.records_in_file = 0;

        // The new segment is already writable; retention can catch up next time.
        if let Err(e) = self.prune() {
            warn!("Record log retention failed in {}: {}", self.dir.display(), e);
        }
        Ok(())
    }

    fn prune(&self) -> Result<()> {
        if self.max_files_to_keep == 0 {
            return Ok(());
        }

        let segments = Self::segment_paths(&self.dir)?;
        let excess = segments.len().saturating_sub(self.max_files_to_keep);
        for (_, path) in segments.into_iter().take(excess) {
            info!("Removing old record segment {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl RecordSink for JsonlSink {
    fn append(&mut self, record: &FlatRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TelemetryError::SinkWrite("no open segment".to_string()))?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        self.records_in_file += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Counters reported when the sink task finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub written: u64,
    pub failed: u64,
}

/// Producer-side handle to a sink running on a blocking task
#[derive(Debug)]
pub struct SinkHandle {
    tx: Option<mpsc::Sender<Arc<TelemetryRecord>>>,
    task: JoinHandle<SinkStats>,
    dropped: u64,
}

impl SinkHandle {
    /// Move `sink` onto a blocking task fed by a queue of `queue_depth` records
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S: RecordSink + 'static>(sink: S, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Arc<TelemetryRecord>>(queue_depth.max(1));

        let task = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            let mut stats = SinkStats::default();

            while let Some(record) = rx.blocking_recv() {
                match sink.append(&FlatRecord::from(record.as_ref())) {
                    Ok(()) => stats.written += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!("{}", TelemetryError::SinkWrite(e.to_string()));
                    }
                }
            }

            if let Err(e) = sink.flush() {
                error!("{}", TelemetryError::SinkWrite(e.to_string()));
            }
            stats
        });

        Self {
            tx: Some(tx),
            task,
            dropped: 0,
        }
    }

    /// Hand a finalized record to the sink without waiting
    ///
    /// Returns false if the record was dropped because the queue is full or
    /// the sink task has stopped.
    pub fn submit(&mut self, record: Arc<TelemetryRecord>) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };

        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!("Record log is backlogged, dropped record ({} total)", self.dropped);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                warn!("Record log task has stopped, dropped record");
                false
            }
        }
    }

    /// Records dropped at hand-off
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stop accepting records and wait up to `timeout` for the queue to drain
    pub async fn close(mut self, timeout: Duration) -> Option<SinkStats> {
        drop(self.tx.take());

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(stats)) => {
                info!(
                    "Record log closed ({} written, {} failed, {} dropped)",
                    stats.written, stats.failed, self.dropped
                );
                Some(stats)
            }
            Ok(Err(e)) => {
                error!("Record log task failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Record log did not drain within {:?}", timeout);
                None
            }
        }
    }
}

//! # Telemetry Module
//!
//! Everything downstream of the parser.
//!
//! This module handles:
//! - Deriving ground speed and observer distance from GPS fixes
//! - Shared latest-record, link-status and history state
//! - Fan-out of live events to observers
//! - Persisting finalized records to rotating JSONL files
//! - Exporting the record log as CSV
//! - The producer task that drives the whole pipeline

pub mod export;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod motion;
pub mod sink;
pub mod store;

pub use export::{export_csv, export_csv_file};
pub use history::HistoryBuffer;
pub use hub::{ObserverId, TelemetryEvent};
pub use ingest::{IngestStats, Ingestor};
pub use motion::{distance_to_observer_km, haversine_m, SpeedEstimator};
pub use sink::{FlatRecord, JsonlSink, RecordSink, SinkHandle};
pub use store::{ErrorClearPolicy, Snapshot, Subscription, TelemetryStore};

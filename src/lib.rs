//! # Balloon Telemetry Library
//!
//! Ground-station ingestion for a high-altitude balloon payload.
//!
//! This library reads the payload's ASCII telemetry from a serial receiver,
//! parses it into structured records, derives ground speed, keeps a bounded
//! in-memory history for live observers and hands every record to a rotating
//! on-disk log.

pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod shutdown;
pub mod telemetry;

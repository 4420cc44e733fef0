//! # Payload Protocol Module
//!
//! ASCII micro-protocol spoken by the balloon payload receiver.
//!
//! This module handles:
//! - Splitting the serial byte stream into lines
//! - Recognising telemetry frames and side-channel signal reports
//! - Schema-driven parsing of GPS/ENV/AIR/OZ/UV/PMS sections
//! - The in-memory telemetry data model

pub mod framer;
pub mod parser;
pub mod schema;
pub mod signal;
pub mod types;

pub use framer::{Frame, FrameClassifier, LineFramer};
pub use parser::{ConversionPolicy, FieldParser, ParsedFrame};
pub use types::{AirQuality, Environment, GpsFix, LinkStatus, Particulate, SignalReport, TelemetryRecord};

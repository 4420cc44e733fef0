//! # Field Parser
//!
//! Decomposes one telemetry frame into a [`TelemetryRecord`].
//!
//! Parsing is isolated per section: a garbled or missing section is logged
//! and skipped, and the remaining sections still land in the record. Wire
//! sentinels (`ERR`, `NO_FIX`) are translated to `None` here and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::schema::{self, SectionKind, SectionSpec, SectionValues, FIELD_DELIMITER, SECTION_DELIMITER};
use super::types::{AirQuality, Environment, GpsFix, Particulate, TelemetryRecord};
use crate::error::{Result, TelemetryError};

/// What to do when a non-sentinel field cannot be converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPolicy {
    /// Discard the whole section the field belongs to
    #[default]
    DropSection,
    /// Leave only that field absent
    DropField,
}

/// Parser output for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub record: TelemetryRecord,
    /// True when any ENV/AIR/OZ/UV/PMS field carried a value
    pub has_sensor_data: bool,
}

/// Schema-driven frame parser
#[derive(Debug, Clone, Default)]
pub struct FieldParser {
    policy: ConversionPolicy,
}

impl FieldParser {
    pub fn new(policy: ConversionPolicy) -> Self {
        Self { policy }
    }

    /// Parse a frame (marker already stripped) received at `timestamp`
    ///
    /// Never fails: every problem is confined to the section it occurs in.
    ///
    /// # Examples
    ///
    /// ```
    /// use balloon_telemetry::protocol::parser::FieldParser;
    ///
    /// let parsed = FieldParser::default().parse("GPS,NO_FIX|OZ,42", chrono::Utc::now());
    /// assert!(parsed.record.gps.is_none());
    /// assert_eq!(parsed.record.ozone, Some(42));
    /// assert!(parsed.has_sensor_data);
    /// ```
    pub fn parse(&self, frame: &str, timestamp: DateTime<Utc>) -> ParsedFrame {
        let mut record = TelemetryRecord::new(timestamp);

        for section in frame.split(SECTION_DELIMITER).map(str::trim) {
            if section.is_empty() {
                continue;
            }
            if let Err(e) = self.parse_section(section, &mut record) {
                debug!("Skipping section '{}': {}", section, e);
            }
        }

        let has_sensor_data = record.has_sensor_data();
        ParsedFrame {
            record,
            has_sensor_data,
        }
    }

    fn parse_section(&self, section: &str, record: &mut TelemetryRecord) -> Result<()> {
        let mut tokens = section.split(FIELD_DELIMITER).map(str::trim);
        let tag = tokens.next().unwrap_or_default();
        let raw: Vec<&str> = tokens.collect();

        let spec = schema::lookup(tag).ok_or_else(|| TelemetryError::FieldParse {
            section: tag.to_string(),
            field: "*".to_string(),
            reason: "unknown section tag".to_string(),
        })?;

        if let (Some(sentinel), Some(first)) = (spec.absent_sentinel, raw.first()) {
            if first == &sentinel {
                apply(&SectionValues::new(spec, vec![None; spec.fields.len()]), spec, record);
                return Ok(());
            }
        }

        if raw.len() < spec.fields.len() {
            return Err(TelemetryError::FieldParse {
                section: tag.to_string(),
                field: "*".to_string(),
                reason: format!("expected {} fields, got {}", spec.fields.len(), raw.len()),
            });
        }

        let mut values = Vec::with_capacity(spec.fields.len());
        for (field, token) in spec.fields.iter().zip(raw.iter()) {
            match field.convert(token) {
                Ok(value) => values.push(value),
                Err(reason) => {
                    let err = TelemetryError::FieldParse {
                        section: tag.to_string(),
                        field: field.name.to_string(),
                        reason,
                    };
                    match self.policy {
                        ConversionPolicy::DropSection => return Err(err),
                        ConversionPolicy::DropField => {
                            debug!("{}", err);
                            values.push(None);
                        }
                    }
                }
            }
        }

        apply(&SectionValues::new(spec, values), spec, record);
        Ok(())
    }
}

/// Fill the record slot for one decoded section
///
/// A section with no field present leaves its slot absent.
fn apply(values: &SectionValues, spec: &SectionSpec, record: &mut TelemetryRecord) {
    match spec.kind {
        SectionKind::Gps => record.gps = gps_fix(values),
        SectionKind::Environment => {
            let env = Environment {
                temperature: values.float("temperature"),
                pressure: values.float("pressure"),
                humidity: values.float("humidity"),
                baro_altitude: values.float("baro_altitude"),
            };
            record.environment = Some(env).filter(|e| *e != Environment::default());
        }
        SectionKind::AirQuality => {
            let air = AirQuality {
                index: values.unsigned("index"),
                tvoc: values.unsigned("tvoc"),
                eco2: values.unsigned("eco2"),
            };
            record.air_quality = Some(air).filter(|a| *a != AirQuality::default());
        }
        SectionKind::Ozone => record.ozone = values.unsigned("ozone"),
        // Negative UV readings come from an uncalibrated sensor
        SectionKind::Uv => record.uv_index = values.float("index").filter(|uv| *uv >= 0.0),
        SectionKind::Particulate => {
            let pm = Particulate {
                pm1: values.unsigned("pm1"),
                pm2_5: values.unsigned("pm2_5"),
                pm10: values.unsigned("pm10"),
            };
            record.particulate = Some(pm).filter(|p| *p != Particulate::default());
        }
    }
}

fn gps_fix(values: &SectionValues) -> Option<GpsFix> {
    let latitude = values.float("latitude")?;
    let longitude = values.float("longitude")?;

    // Receivers report 0,0 before acquiring a fix
    if latitude == 0.0 && longitude == 0.0 {
        debug!("Discarding GPS fix at 0,0");
        return None;
    }

    Some(GpsFix {
        latitude,
        longitude,
        altitude: values.float("altitude"),
        satellites: values.unsigned("satellites"),
        fix_time: values.text("time"),
    })
}

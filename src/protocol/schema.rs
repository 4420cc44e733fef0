//! # Section Schema
//!
//! Declarative description of the payload micro-protocol. Each section is a
//! tag followed by comma-separated fields:
//!
//! | Tag | Fields | Section sentinel |
//! |-----|--------|------------------|
//! | `GPS` | latitude, longitude, altitude, satellites, time | `NO_FIX` |
//! | `ENV` | temperature, pressure, humidity, baro_altitude | |
//! | `AIR` | index, tvoc, eco2 | |
//! | `OZ`  | ozone | |
//! | `UV`  | index | |
//! | `PMS` | pm1, pm2_5, pm10 | |
//!
//! Any individual field may read `ERR`. Adding a sensor means adding a row to
//! [`SECTIONS`] and a [`SectionKind`] arm in the parser.

/// Per-field "value intentionally absent" token
pub const FIELD_SENTINEL: &str = "ERR";

/// Section-level "no fix" token for GPS
pub const NO_FIX_SENTINEL: &str = "NO_FIX";

/// Section delimiter within a frame
pub const SECTION_DELIMITER: char = '|';

/// Field delimiter within a section
pub const FIELD_DELIMITER: char = ',';

/// Wire type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Float,
    Unsigned,
    Text,
}

/// Record slot a section fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Gps,
    Environment,
    AirQuality,
    Ozone,
    Uv,
    Particulate,
}

/// One field of a section
#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// One section of the protocol
#[derive(Debug)]
pub struct SectionSpec {
    pub tag: &'static str,
    pub kind: SectionKind,
    pub fields: &'static [FieldSpec],
    /// Token in first field position meaning the whole section is absent
    pub absent_sentinel: Option<&'static str>,
}

/// Decoded value of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Unsigned(u32),
    Text(String),
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

static GPS_FIELDS: [FieldSpec; 5] = [
    field("latitude", FieldKind::Float),
    field("longitude", FieldKind::Float),
    field("altitude", FieldKind::Float),
    field("satellites", FieldKind::Unsigned),
    field("time", FieldKind::Text),
];

static ENV_FIELDS: [FieldSpec; 4] = [
    field("temperature", FieldKind::Float),
    field("pressure", FieldKind::Float),
    field("humidity", FieldKind::Float),
    field("baro_altitude", FieldKind::Float),
];

static AIR_FIELDS: [FieldSpec; 3] = [
    field("index", FieldKind::Unsigned),
    field("tvoc", FieldKind::Unsigned),
    field("eco2", FieldKind::Unsigned),
];

static OZ_FIELDS: [FieldSpec; 1] = [field("ozone", FieldKind::Unsigned)];

static UV_FIELDS: [FieldSpec; 1] = [field("index", FieldKind::Float)];

static PMS_FIELDS: [FieldSpec; 3] = [
    field("pm1", FieldKind::Unsigned),
    field("pm2_5", FieldKind::Unsigned),
    field("pm10", FieldKind::Unsigned),
];

/// All sections the parser understands
pub static SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        tag: "GPS",
        kind: SectionKind::Gps,
        fields: &GPS_FIELDS,
        absent_sentinel: Some(NO_FIX_SENTINEL),
    },
    SectionSpec {
        tag: "ENV",
        kind: SectionKind::Environment,
        fields: &ENV_FIELDS,
        absent_sentinel: None,
    },
    SectionSpec {
        tag: "AIR",
        kind: SectionKind::AirQuality,
        fields: &AIR_FIELDS,
        absent_sentinel: None,
    },
    SectionSpec {
        tag: "OZ",
        kind: SectionKind::Ozone,
        fields: &OZ_FIELDS,
        absent_sentinel: None,
    },
    SectionSpec {
        tag: "UV",
        kind: SectionKind::Uv,
        fields: &UV_FIELDS,
        absent_sentinel: None,
    },
    SectionSpec {
        tag: "PMS",
        kind: SectionKind::Particulate,
        fields: &PMS_FIELDS,
        absent_sentinel: None,
    },
];

/// Find the section spec for a tag
pub fn lookup(tag: &str) -> Option<&'static SectionSpec> {
    SECTIONS.iter().find(|spec| spec.tag == tag)
}

impl FieldSpec {
    /// Convert one raw token
    ///
    /// Returns `Ok(None)` for the sentinel and `Err(reason)` when the token
    /// cannot be read as this field's type.
    pub fn convert(&self, raw: &str) -> Result<Option<FieldValue>, String> {
        if raw == FIELD_SENTINEL {
            return Ok(None);
        }

        match self.kind {
            FieldKind::Float => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(FieldValue::Float(v))),
                Ok(v) => Err(format!("non-finite value {}", v)),
                Err(e) => Err(format!("'{}': {}", raw, e)),
            },
            FieldKind::Unsigned => raw
                .parse::<u32>()
                .map(|v| Some(FieldValue::Unsigned(v)))
                .map_err(|e| format!("'{}': {}", raw, e)),
            FieldKind::Text if raw.is_empty() => Err("empty text field".to_string()),
            FieldKind::Text => Ok(Some(FieldValue::Text(raw.to_string()))),
        }
    }
}

/// Decoded fields of one section, in schema order
#[derive(Debug)]
pub struct SectionValues {
    spec: &'static SectionSpec,
    values: Vec<Option<FieldValue>>,
}

impl SectionValues {
    pub fn new(spec: &'static SectionSpec, values: Vec<Option<FieldValue>>) -> Self {
        Self { spec, values }
    }

    fn get(&self, name: &str) -> Option<&FieldValue> {
        let idx = self.spec.fields.iter().position(|f| f.name == name)?;
        self.values.get(idx)?.as_ref()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(FieldValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn unsigned(&self, name: &str) -> Option<u32> {
        match self.get(name) {
            Some(FieldValue::Unsigned(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(FieldValue::Text(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

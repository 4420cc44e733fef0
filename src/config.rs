//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field is optional; missing values fall back to the
//! defaults below, which match the payload receiver's factory settings.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};
use crate::protocol::parser::ConversionPolicy;
use crate::telemetry::store::ErrorClearPolicy;

/// Upper bound on history entries sent to a newly registered observer
pub const MAX_SNAPSHOT_HISTORY: usize = 100;

/// Baud rates accepted for the receiver link
const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_open_retry_ms")]
    pub open_retry_ms: u64,

    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Wire protocol configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_frame_prefix")]
    pub frame_prefix: String,

    #[serde(default = "default_signal_prefix")]
    pub signal_prefix: String,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    #[serde(default)]
    pub on_conversion_failure: ConversionPolicy,
}

/// In-memory store and observer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_snapshot_history")]
    pub snapshot_history: usize,

    #[serde(default = "default_observer_queue")]
    pub observer_queue: usize,

    #[serde(default)]
    pub error_clear_policy: ErrorClearPolicy,
}

/// Durable record log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default)]
    pub max_files_to_keep: usize,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_open_retry_ms() -> u64 { 5000 }
fn default_read_retry_ms() -> u64 { 2000 }
fn default_settle_ms() -> u64 { 500 }
fn default_read_buffer_size() -> usize { 1024 }

fn default_frame_prefix() -> String { "Donnees brutes: ".to_string() }
fn default_signal_prefix() -> String { "RSSI:".to_string() }
fn default_max_line_length() -> usize { 4096 }

fn default_history_capacity() -> usize { 500 }
fn default_snapshot_history() -> usize { MAX_SNAPSHOT_HISTORY }
fn default_observer_queue() -> usize { 256 }

fn default_persistence_enabled() -> bool { true }
fn default_log_dir() -> String { "./data".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_queue_depth() -> usize { 1024 }
fn default_drain_timeout_ms() -> u64 { 2000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            open_retry_ms: default_open_retry_ms(),
            read_retry_ms: default_read_retry_ms(),
            settle_ms: default_settle_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            frame_prefix: default_frame_prefix(),
            signal_prefix: default_signal_prefix(),
            max_line_length: default_max_line_length(),
            on_conversion_failure: ConversionPolicy::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            snapshot_history: default_snapshot_history(),
            observer_queue: default_observer_queue(),
            error_clear_policy: ErrorClearPolicy::default(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: 0,
            queue_depth: default_queue_depth(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: String::new(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl PersistenceConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use balloon_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial link
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        for (name, value) in [
            ("open_retry_ms", self.serial.open_retry_ms),
            ("read_retry_ms", self.serial.read_retry_ms),
        ] {
            if value == 0 || value > 60000 {
                return Err(invalid(format!("{} must be between 1 and 60000", name)));
            }
        }

        if self.serial.settle_ms > 10000 {
            return Err(invalid("settle_ms must be at most 10000"));
        }

        if self.serial.read_buffer_size < 16 || self.serial.read_buffer_size > 65536 {
            return Err(invalid("read_buffer_size must be between 16 and 65536"));
        }

        // Protocol
        if self.protocol.frame_prefix == self.protocol.signal_prefix {
            return Err(invalid("frame_prefix and signal_prefix must differ"));
        }

        if self.protocol.signal_prefix.is_empty() {
            return Err(invalid("signal_prefix cannot be empty"));
        }

        if self.protocol.max_line_length < 64 || self.protocol.max_line_length > 1_048_576 {
            return Err(invalid("max_line_length must be between 64 and 1048576"));
        }

        // Store
        if self.store.history_capacity == 0 || self.store.history_capacity > 100_000 {
            return Err(invalid("history_capacity must be between 1 and 100000"));
        }

        if self.store.snapshot_history == 0
            || self.store.snapshot_history > self.store.history_capacity
        {
            return Err(invalid("snapshot_history must be between 1 and history_capacity"));
        }

        if self.store.observer_queue == 0 {
            return Err(invalid("observer_queue must be greater than 0"));
        }

        // Persistence
        if self.persistence.enabled && self.persistence.log_dir.is_empty() {
            return Err(invalid("persistence log_dir cannot be empty when enabled"));
        }

        if self.persistence.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.persistence.queue_depth == 0 {
            return Err(invalid("queue_depth must be greater than 0"));
        }

        if self.persistence.drain_timeout_ms == 0 || self.persistence.drain_timeout_ms > 60000 {
            return Err(invalid("drain_timeout_ms must be between 1 and 60000"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

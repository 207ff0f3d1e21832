//! Sensor configuration
//!
//! Serial line parameters and protocol timing, loadable from a JSON file.
//! Every field has a default, so a file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_BYTE_POLL_MS, DEFAULT_DATA_TIMEOUT_MS,
    DEFAULT_IO_TIMEOUT_MS, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_SETTLE_MS,
};

/// How readings are obtained from the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Ask for each reading with a `query_data` command
    #[default]
    Query,
    /// Listen for reports the sensor streams on its own
    Active,
}

/// Connection and timing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-call read/write timeout
    pub io_timeout_ms: u64,
    /// Wait between writing a command and reading its reply
    pub settle_ms: u64,
    /// Deadline for collecting a command reply
    pub response_timeout_ms: u64,
    /// Deadline for collecting a streamed data report (active mode)
    pub data_timeout_ms: u64,
    /// Wait between query-mode poll cycles
    pub poll_interval_ms: u64,
    /// Wait between active-mode listen cycles
    pub active_wait_ms: u64,
    /// Fan and laser spin-up time before the first command
    pub warmup_ms: u64,
    /// Wait after opening the port before first use
    pub open_delay_ms: u64,
    /// Sleep between transport polls while collecting a frame
    pub byte_poll_interval_ms: u64,
    /// Query or active acquisition
    pub report_mode: ReportMode,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            data_timeout_ms: DEFAULT_DATA_TIMEOUT_MS,
            poll_interval_ms: 10_000,
            active_wait_ms: 5000,
            warmup_ms: 10_000,
            open_delay_ms: 1000,
            byte_poll_interval_ms: DEFAULT_BYTE_POLL_MS,
            report_mode: ReportMode::Query,
        }
    }
}

impl SensorConfig {
    /// Default settings for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: SensorConfig = serde_json::from_str(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save settings as pretty-printed JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.port_name.trim().is_empty() {
            return Err(ProtocolError::Config("port_name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be non-zero".into()));
        }
        for (name, value) in [
            ("io_timeout_ms", self.io_timeout_ms),
            ("response_timeout_ms", self.response_timeout_ms),
            ("data_timeout_ms", self.data_timeout_ms),
        ] {
            if value == 0 {
                return Err(ProtocolError::Config(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    /// Per-call serial read/write timeout
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Wait between writing a command and reading its reply
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Deadline for a command reply
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Deadline for one streamed data report
    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }

    /// Pause between query-mode cycles
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause between active-mode reads
    pub fn active_wait(&self) -> Duration {
        Duration::from_millis(self.active_wait_ms)
    }

    /// Fan and laser spin-up time
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    /// Wait after opening the port
    pub fn open_delay(&self) -> Duration {
        Duration::from_millis(self.open_delay_ms)
    }

    /// Sleep while no bytes are pending
    pub fn byte_poll_interval(&self) -> Duration {
        Duration::from_millis(self.byte_poll_interval_ms)
    }
}

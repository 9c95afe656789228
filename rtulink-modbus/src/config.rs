//! Configuration for the RTU connector.

use rtulink_common::{Format, LoggingConfig, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::codec;
use crate::engine::EngineSettings;
use crate::identifier::parse_identifier;
use crate::registry::MAX_BUS_ADDRESS;
use crate::types::{DataType, RegisterKind, ValueFormat};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Load(#[from] rtulink_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Serial line settings
    pub serial: SerialConfig,

    /// Retry and timing policy
    #[serde(default)]
    pub engine: EngineConfig,

    /// Devices on the line
    pub devices: Vec<DeviceConfig>,

    /// Change report output
    #[serde(default)]
    pub reports: ReportsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial line configuration. Framing is fixed at 8N1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub port: String,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-transaction response timeout in milliseconds (default: 200)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    200
}

/// Retry and timing policy of the polling engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Consecutive failures before a device is marked lost (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before a lost device is probed again (default: 5000)
    #[serde(default = "default_lost_delay_ms")]
    pub lost_delay_ms: u64,

    /// Minimum gap between re-issuing the same pending write (default: 2000)
    #[serde(default = "default_write_delay_ms")]
    pub write_delay_ms: u64,

    /// Pause between a write and its read-back (default: 10)
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Pause between two ticks of the poll loop (default: 10)
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lost_delay_ms() -> u64 {
    5000
}

fn default_write_delay_ms() -> u64 {
    2000
}

fn default_verify_delay_ms() -> u64 {
    10
}

fn default_idle_delay_ms() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lost_delay_ms: default_lost_delay_ms(),
            write_delay_ms: default_write_delay_ms(),
            verify_delay_ms: default_verify_delay_ms(),
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            max_attempts: self.max_attempts,
            lost_delay: Duration::from_millis(self.lost_delay_ms),
            write_delay: Duration::from_millis(self.write_delay_ms),
            verify_delay: Duration::from_millis(self.verify_delay_ms),
        }
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

/// Configuration for a single bus device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in reports)
    pub name: String,

    /// Modbus slave address (1-247)
    pub address: u8,

    /// Minimum interval between full read sweeps in milliseconds
    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,

    /// Whether the device is polled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Static properties (model, serial number...)
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    /// Registers to poll
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,
}

fn default_sampling_interval_ms() -> u64 {
    10_000
}

fn default_enabled() -> bool {
    true
}

impl DeviceConfig {
    pub fn sampling_time(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }
}

/// Configuration for one register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// `<name>_<address>`, e.g. "temperature_40001"
    pub identifier: String,

    /// Register type
    #[serde(rename = "type")]
    pub kind: RegisterKind,

    /// Declared value type
    pub data_type: DataType,

    /// Scale, enumeration members or text length
    #[serde(default)]
    pub format: Option<ValueFormat>,

    /// Value the device reports when it has no reading
    #[serde(default)]
    pub invalid: Option<Value>,

    /// Grouping label
    #[serde(default)]
    pub channel: Option<String>,
}

/// Where change reports go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Print reports on stdout (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Output encoding: "json" (one object per line) or "cbor"
    #[serde(default)]
    pub format: Format,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: Format::default(),
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ConnectorConfig = rtulink_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "serial.baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "At least one device must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();

        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Device name cannot be empty".to_string(),
                ));
            }

            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': name is used more than once",
                    device.name
                )));
            }

            if device.address == 0 || device.address > MAX_BUS_ADDRESS {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': address must be 1-{}",
                    device.name, MAX_BUS_ADDRESS
                )));
            }

            if !addresses.insert(device.address) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': address {} is used by another device",
                    device.name, device.address
                )));
            }

            for register in &device.registers {
                parse_identifier(&register.identifier).map_err(|e| {
                    ConfigError::Validation(format!("Device '{}': {}", device.name, e))
                })?;
                codec::layout(register.kind, register.data_type, register.format.as_ref())
                    .map_err(|e| {
                        ConfigError::Validation(format!(
                            "Device '{}', register '{}': {}",
                            device.name, register.identifier, e
                        ))
                    })?;
            }
        }

        Ok(())
    }
}

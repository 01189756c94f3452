//! Configuration for the motorlink gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use motorlink_common::LoggingConfig;

use crate::channel::SerialSettings;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Common(#[from] motorlink_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Serial motor controllers
    #[serde(default)]
    pub motors: MotorConfig,

    /// Modbus tilt sensor (optional)
    #[serde(default)]
    pub sensor: Option<SensorConfig>,

    /// HTTP surface
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Motor channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Device paths or glob patterns (default: ["/dev/ttyUSB*"])
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,

    /// Baud rate (default: 9600)
    #[serde(default = "default_motor_baud_rate")]
    pub baud_rate: u32,

    /// Per-operation I/O timeout in milliseconds (default: 200)
    #[serde(default = "default_motor_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between channel scans in milliseconds (default: 10)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of events kept in the log (default: 50)
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_ports() -> Vec<String> {
    vec!["/dev/ttyUSB*".to_string()]
}

fn default_motor_baud_rate() -> u32 {
    9600
}

fn default_motor_timeout_ms() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_log_capacity() -> usize {
    crate::event_log::DEFAULT_LOG_CAPACITY
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            baud_rate: default_motor_baud_rate(),
            timeout_ms: default_motor_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl MotorConfig {
    /// Serial settings applied to every motor channel.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration for the Modbus tilt sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and read timeout in milliseconds
    #[serde(default = "default_sensor_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_sensor_timeout_ms() -> u64 {
    1000
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection (serial-to-network bridge)
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 8899)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB1")
        port: String,
        /// Baud rate (default: 4800)
        #[serde(default = "default_sensor_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    8899
}

fn default_sensor_baud_rate() -> u32 {
    4800
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu:{}@{}", port, baud_rate),
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: "0.0.0.0:5000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: GatewayConfig = motorlink_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let motors = &self.motors;

        if motors.ports.is_empty() {
            return Err(ConfigError::Validation(
                "At least one motor port or pattern must be configured".to_string(),
            ));
        }

        if motors.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "motors.baud_rate must be greater than 0".to_string(),
            ));
        }

        if motors.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "motors.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if motors.log_capacity == 0 {
            return Err(ConfigError::Validation(
                "motors.log_capacity must be greater than 0".to_string(),
            ));
        }

        if let Some(sensor) = &self.sensor {
            if sensor.unit_id == 0 || sensor.unit_id > 247 {
                return Err(ConfigError::Validation(format!(
                    "sensor.unit_id must be 1-247, got {}",
                    sensor.unit_id
                )));
            }

            // Validate RTU parity
            if let ConnectionConfig::Rtu { parity, .. } = &sensor.connection {
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(ConfigError::Validation(format!(
                            "sensor: invalid parity '{}' (use none, even, or odd)",
                            parity
                        )));
                    }
                }
            }
        }

        self.listen_addr()?;

        Ok(())
    }

    /// Parsed HTTP listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.listen.parse().map_err(|e| {
            ConfigError::Validation(format!(
                "Invalid http.listen address '{}': {}",
                self.http.listen, e
            ))
        })
    }

    /// Expand motor port patterns into a sorted endpoint list.
    ///
    /// A serial port claimed by the tilt sensor is never opened as a motor
    /// channel.
    pub fn motor_endpoints(&self) -> Result<Vec<String>, ConfigError> {
        let exclude: Vec<&str> = match &self.sensor {
            Some(SensorConfig {
                connection: ConnectionConfig::Rtu { port, .. },
                ..
            }) => vec![port.as_str()],
            _ => Vec::new(),
        };

        Ok(motorlink_common::discover_endpoints(
            &self.motors.ports,
            &exclude,
        )?)
    }
}

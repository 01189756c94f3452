//! Modbus tilt sensor client.
//!
//! The sensor exposes roll, pitch and yaw as three consecutive holding
//! registers starting at address 0. Each register holds a two's-complement
//! angle in hundredths of a degree.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, SensorConfig};

/// First holding register of the angle triple.
pub const ANGLE_START_ADDRESS: u16 = 0;

/// Number of registers read per sample (roll, pitch, yaw).
pub const ANGLE_REGISTER_COUNT: u16 = 3;

/// Register units per degree.
pub const ANGLE_SCALE: f64 = 100.0;

/// Error type for sensor operations.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),
    #[error("Expected {expected} registers, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
    #[error("Sensor is closed")]
    Closed,
}

/// Register-level access to the sensor.
///
/// Implemented for `tokio_modbus` contexts (TCP and RTU) and for in-memory
/// test doubles.
pub trait RegisterTransport: Send {
    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, SensorError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), SensorError>> + Send;
}

impl RegisterTransport for Context {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SensorError> {
        Reader::read_holding_registers(self, address, count)
            .await
            .map_err(|e| SensorError::Read(e.to_string()))?
            .map_err(|e| SensorError::Exception(format!("{:?}", e)))
    }

    async fn disconnect(&mut self) -> Result<(), SensorError> {
        Client::disconnect(self)
            .await
            .map_err(|e| SensorError::Read(e.to_string()))
    }
}

/// Interpret a raw register as a signed 16-bit value.
pub const fn to_signed(raw: u16) -> i32 {
    if raw > 32767 {
        raw as i32 - 65536
    } else {
        raw as i32
    }
}

/// Convert a raw register to degrees.
pub fn register_to_degrees(raw: u16) -> f64 {
    to_signed(raw) as f64 / ANGLE_SCALE
}

/// One orientation sample, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl SensorReading {
    /// Build a reading from the raw roll/pitch/yaw registers.
    pub fn from_registers(registers: [u16; 3]) -> Self {
        let [roll, pitch, yaw] = registers.map(register_to_degrees);
        Self { roll, pitch, yaw }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Roll: {:7.2}°  Pitch: {:7.2}°  Yaw: {:7.2}°",
            self.roll, self.pitch, self.yaw
        )
    }
}

/// Client for the Modbus tilt sensor.
///
/// Connection failures are fatal at construction. Once connected, each
/// [`read_angles`](Self::read_angles) call either yields a full reading or
/// `None`; nothing is retried internally.
pub struct SensorClient<T: RegisterTransport = Context> {
    transport: Option<T>,
    timeout: Duration,
}

impl SensorClient<Context> {
    /// Connect to the sensor described by `config`.
    pub async fn connect(config: &SensorConfig) -> Result<Self, SensorError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let slave = Slave(config.unit_id);

        let ctx = match &config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| SensorError::Connect(format!("Invalid address: {}", e)))?
                    .next()
                    .ok_or_else(|| {
                        SensorError::Connect(format!("No address found for {}:{}", host, port))
                    })?;

                tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| SensorError::Connect("Connection timeout".to_string()))?
                    .map_err(|e| SensorError::Connect(e.to_string()))?
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits)
                    .timeout(timeout);

                let serial = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| SensorError::Connect(format!("Serial open failed: {}", e)))?;

                rtu::attach_slave(serial, slave)
            }
        };

        info!(connection = %config.connection, unit_id = config.unit_id, "Tilt sensor connected");

        Ok(Self::with_transport(ctx, timeout))
    }
}

impl<T: RegisterTransport> SensorClient<T> {
    /// Wrap an already connected transport.
    pub fn with_transport(transport: T, timeout: Duration) -> Self {
        Self {
            transport: Some(transport),
            timeout,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Read roll, pitch and yaw in one request.
    pub async fn try_read_angles(&mut self) -> Result<SensorReading, SensorError> {
        let transport = self.transport.as_mut().ok_or(SensorError::Closed)?;

        let registers = tokio::time::timeout(
            self.timeout,
            transport.read_holding_registers(ANGLE_START_ADDRESS, ANGLE_REGISTER_COUNT),
        )
        .await
        .map_err(|_| SensorError::Timeout(self.timeout))??;

        match registers.as_slice() {
            [roll, pitch, yaw, ..] => Ok(SensorReading::from_registers([*roll, *pitch, *yaw])),
            other => Err(SensorError::ShortResponse {
                expected: ANGLE_REGISTER_COUNT as usize,
                actual: other.len(),
            }),
        }
    }

    /// Read the current angles, or `None` if the read failed.
    ///
    /// Failures are logged and contained here; callers poll again on their
    /// own schedule.
    pub async fn read_angles(&mut self) -> Option<SensorReading> {
        match self.try_read_angles().await {
            Ok(reading) => {
                debug!(
                    roll = reading.roll,
                    pitch = reading.pitch,
                    yaw = reading.yaw,
                    "Tilt sensor read"
                );
                Some(reading)
            }
            Err(e) => {
                warn!(error = %e, "Tilt sensor read failed");
                None
            }
        }
    }

    /// Release the transport. Calling this more than once is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.disconnect().await {
                debug!(error = %e, "Error while closing tilt sensor");
            }
            info!("Tilt sensor closed");
        }
    }
}

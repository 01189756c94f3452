//! Gateway context tying channels, poller, dispatcher and sensor together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_modbus::client::Context;
use tracing::{info, warn};

use crate::config::{ConfigError, GatewayConfig};
use crate::dispatcher::{CommandDispatcher, DispatchError, DispatchReport};
use crate::event_log::{EventLog, LogEvent, SharedEventLog};
use crate::poller::{ChannelPoller, PollerStats, PollerStatsSnapshot};
use crate::registry::{ChannelRegistry, SharedRegistry};
use crate::sensor::{RegisterTransport, SensorClient, SensorError, SensorReading};

/// Errors that prevent the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Tilt sensor unavailable: {0}")]
    Sensor(#[from] SensorError),
}

/// Running gateway.
///
/// Owns the channel registry, the event log, the background poller and the
/// optional tilt sensor. Build it with [`Gateway::start`] and release it with
/// [`Gateway::shutdown`].
pub struct Gateway<T: RegisterTransport = Context> {
    registry: SharedRegistry,
    log: SharedEventLog,
    dispatcher: CommandDispatcher,
    sensor: Option<tokio::sync::Mutex<SensorClient<T>>>,
    poller_stats: Arc<PollerStats>,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway<Context> {
    /// Open channels, connect the sensor and start polling.
    ///
    /// Individual motor ports that fail to open are skipped. A configured
    /// sensor that cannot be reached fails the whole start.
    pub async fn start(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let endpoints = config.motor_endpoints()?;
        info!(endpoints = ?endpoints, "Discovered motor endpoints");

        let registry = ChannelRegistry::open(&endpoints, config.motors.serial_settings());

        let sensor = match &config.sensor {
            Some(sensor_config) => Some(SensorClient::connect(sensor_config).await?),
            None => None,
        };

        Ok(Self::from_parts(
            registry,
            sensor,
            config.motors.log_capacity,
            config.motors.poll_interval(),
        ))
    }
}

impl<T: RegisterTransport> Gateway<T> {
    /// Assemble a gateway from already opened parts and spawn the poller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_parts(
        registry: ChannelRegistry,
        sensor: Option<SensorClient<T>>,
        log_capacity: usize,
        poll_interval: Duration,
    ) -> Self {
        let registry = Arc::new(registry);
        let log = Arc::new(EventLog::new(log_capacity));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = ChannelPoller::new(registry.clone(), log.clone(), poll_interval);
        let poller_stats = poller.stats();
        let handle = poller.spawn(shutdown_rx);

        info!(
            channels = ?registry.list_ids(),
            sensor = sensor.is_some(),
            "Gateway started"
        );

        Self {
            dispatcher: CommandDispatcher::new(registry.clone()),
            registry,
            log,
            sensor: sensor.map(tokio::sync::Mutex::new),
            poller_stats,
            shutdown_tx,
            poller: Mutex::new(Some(handle)),
        }
    }

    /// Channel IDs in assignment order.
    pub fn device_ids(&self) -> Vec<String> {
        self.registry.list_ids()
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Send an opcode to the given channels.
    pub async fn send_command<S: AsRef<str>>(
        &self,
        opcode_hex: &str,
        targets: &[S],
    ) -> Result<DispatchReport, DispatchError> {
        self.dispatcher.send(opcode_hex, targets).await
    }

    /// Logged events, oldest first.
    pub fn events(&self) -> Vec<LogEvent> {
        self.log.snapshot()
    }

    /// Logged events rendered as `"<channel>: <status>"`, oldest first.
    pub fn log_lines(&self) -> Vec<String> {
        self.log.lines()
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    /// Current sensor angles, or `None` when there is no sensor or the read
    /// failed.
    pub async fn read_angles(&self) -> Option<SensorReading> {
        let sensor = self.sensor.as_ref()?;
        sensor.lock().await.read_angles().await
    }

    pub fn poller_stats(&self) -> PollerStatsSnapshot {
        self.poller_stats.snapshot()
    }

    /// Stop the poller, then close the sensor and every channel.
    ///
    /// The scan in progress is allowed to finish. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Poller task ended abnormally");
            }
        }

        if let Some(sensor) = &self.sensor {
            sensor.lock().await.close().await;
        }

        self.registry.close_all().await;
        info!("Gateway stopped");
    }
}

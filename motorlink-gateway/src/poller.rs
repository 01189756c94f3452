//! Background polling of motor channels.
//!
//! One task scans every channel in registry order, reads at most one waiting
//! status byte per channel, decodes it and appends it to the event log. Log
//! order therefore follows scan order, not the true arrival order across
//! channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::event_log::{LogEvent, SharedEventLog};
use crate::registry::SharedRegistry;
use crate::status::StatusCode;

/// Counters describing poller activity.
#[derive(Debug, Default)]
pub struct PollerStats {
    scans: AtomicU64,
    events: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`PollerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PollerStatsSnapshot {
    pub scans: u64,
    pub events: u64,
    pub errors: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a single scan over all channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Events appended to the log.
    pub events: usize,
    /// Channels whose check or read failed.
    pub errors: usize,
}

/// Poller for all motor channels.
pub struct ChannelPoller {
    registry: SharedRegistry,
    log: SharedEventLog,
    interval: Duration,
    stats: Arc<PollerStats>,
}

impl ChannelPoller {
    /// Create a new poller.
    pub fn new(registry: SharedRegistry, log: SharedEventLog, interval: Duration) -> Self {
        Self {
            registry,
            log,
            interval,
            stats: Arc::new(PollerStats::default()),
        }
    }

    /// Shared handle to this poller's counters.
    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    /// Scan every channel once.
    ///
    /// A failing channel is skipped for this scan; it never stops the scan.
    pub async fn scan_once(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();

        for channel in self.registry.channels() {
            match channel.poll_byte().await {
                Ok(Some(byte)) => {
                    let event = LogEvent::new(channel.id(), StatusCode::decode(byte));
                    trace!(channel = %channel.id(), byte = byte, "Received {}", event);
                    self.log.append(event);
                    summary.events += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(channel = %channel.id(), error = %e, "Channel poll failed");
                    summary.errors += 1;
                }
            }
        }

        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        self.stats
            .events
            .fetch_add(summary.events as u64, Ordering::Relaxed);
        self.stats
            .errors
            .fetch_add(summary.errors as u64, Ordering::Relaxed);

        summary
    }

    /// Run the polling loop until `shutdown` flips to `true` or its sender
    /// is dropped.
    ///
    /// The signal is checked between scans, so an in-flight scan always
    /// completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            channels = self.registry.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting channel poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.scan_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            scans = stats.scans,
            events = stats.events,
            errors = stats.errors,
            "Channel poller stopped"
        );
    }

    /// Spawn the polling loop on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

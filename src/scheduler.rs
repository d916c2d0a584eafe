//! The acquisition loop.
//!
//! Each cycle scans for one window, aggregates what was heard, records the
//! merged readings of known devices and publishes a new [`ScanStatus`]. The
//! loop then idles for `interval - duration` seconds before the next window.
//! Scan failures are logged and retried after [`SCAN_RETRY_DELAY`]; only
//! cancellation ends the loop.
//!
//! [`ScanStatus`]: crate::status::ScanStatus

use crate::aggregate::aggregate;
use crate::metrics::MetricsSink;
use crate::registry::DeviceRegistry;
use crate::scanner::{ScanError, Scanner};
use crate::status::StatusTracker;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause after a failed scan before trying again.
pub const SCAN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Source of the timestamps published in the scan status.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn unix_timestamp(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Scan timing, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time from the start of one window to the start of the next
    pub interval: u64,
    /// Length of each scan window
    pub duration: u64,
}

impl Schedule {
    /// Idle time between the end of one window and the start of the next.
    ///
    /// `None` when the interval leaves no room to idle, meaning windows run
    /// back to back.
    pub fn idle_delay(&self) -> Option<Duration> {
        let idle = self.interval as i128 - self.duration as i128;
        (idle > 0).then(|| Duration::from_secs(idle as u64))
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }
}

/// Drives scans and hands their merged results to a [`MetricsSink`].
pub struct Scheduler<'a> {
    schedule: Schedule,
    scanner: &'a dyn Scanner,
    registry: &'a DeviceRegistry,
    sink: &'a dyn MetricsSink,
    status: &'a StatusTracker,
    clock: &'a dyn Clock,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        schedule: Schedule,
        scanner: &'a dyn Scanner,
        registry: &'a DeviceRegistry,
        sink: &'a dyn MetricsSink,
        status: &'a StatusTracker,
    ) -> Self {
        Self {
            schedule,
            scanner,
            registry,
            sink,
            status,
            clock: &SystemClock,
        }
    }

    /// Use `clock` for status timestamps instead of wall-clock time.
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one acquisition window and report its results.
    ///
    /// Returns the number of devices recorded. The status is only updated once
    /// the window has been fully reported, so dropping this future mid-scan
    /// leaves the previous status in place.
    pub async fn run_cycle(&self) -> Result<usize, ScanError> {
        info!(duration = self.schedule.duration, "starting BLE scan");
        let advertisements = self.scanner.scan(self.schedule.scan_duration()).await?;

        let unknown = advertisements
            .iter()
            .filter(|adv| !self.registry.contains(&adv.id))
            .count();
        if unknown > 0 {
            trace!(unknown, "ignoring advertisements from unknown devices");
        }

        let readings = aggregate(&advertisements, self.registry, |unparsed| {
            warn!("{unparsed}; check the sensor's firmware and advertisement format");
        });

        let mut devices_seen = 0;
        for (id, measurements) in &readings {
            let Some(name) = self.registry.name(id) else {
                continue;
            };
            self.sink.record(name, measurements);
            devices_seen += 1;
            debug!(device = name, %id, "updated metrics: {measurements}");
        }

        self.status.update(self.clock.unix_timestamp(), devices_seen);
        info!(
            advertisements = advertisements.len(),
            devices_seen, "scan complete"
        );
        Ok(devices_seen)
    }

    /// Run scan cycles until `cancel` fires.
    ///
    /// Cancellation is observed while scanning and while idling; the loop then
    /// returns without touching the status.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.run_cycle() => outcome,
            };

            let pause = match outcome {
                Ok(_) => match self.schedule.idle_delay() {
                    Some(idle) => Some(idle),
                    None => {
                        warn!(
                            interval = self.schedule.interval,
                            duration = self.schedule.duration,
                            "scan interval is not longer than scan duration, running scans back-to-back"
                        );
                        None
                    }
                },
                Err(e) => {
                    error!(
                        "scan failed: {e}; retrying in {}s",
                        SCAN_RETRY_DELAY.as_secs()
                    );
                    Some(SCAN_RETRY_DELAY)
                }
            };

            match pause {
                Some(pause) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        info!("scan loop stopped");
    }
}

//! Scan status published by the scheduler.
//!
//! The scheduler is the only writer. Each update replaces the whole
//! [`ScanStatus`] value, so readers never see a timestamp from one window
//! paired with the device count of another.

use tokio::sync::watch;

/// Snapshot of the scheduler's configuration and last completed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStatus {
    /// Configured scan interval in seconds
    pub interval: u64,
    /// Configured scan window in seconds
    pub duration: u64,
    /// Unix timestamp of the last completed window (0 before the first)
    pub last_scan_timestamp: u64,
    /// Devices reported in the last completed window
    pub devices_seen: usize,
}

impl ScanStatus {
    pub fn new(interval: u64, duration: u64) -> Self {
        Self {
            interval,
            duration,
            last_scan_timestamp: 0,
            devices_seen: 0,
        }
    }
}

/// Single-writer holder of the current [`ScanStatus`].
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<ScanStatus>,
}

impl StatusTracker {
    pub fn new(initial: ScanStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Record a completed window.
    pub fn update(&self, timestamp: u64, devices_seen: usize) {
        let current = *self.tx.borrow();
        self.tx.send_replace(ScanStatus {
            last_scan_timestamp: timestamp,
            devices_seen,
            ..current
        });
    }

    /// Current status.
    pub fn snapshot(&self) -> ScanStatus {
        *self.tx.borrow()
    }

    /// Receiver that is notified on every update.
    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.tx.subscribe()
    }
}

//! `ble-sensor-exporter` library.
//!
//! Periodically scans for BTHome v2 BLE advertisements, decodes the readings of
//! known sensors and exports them as Prometheus gauges. The binary
//! (`src/main.rs`) handles logging setup, signals and process exit codes; the
//! pipeline itself lives in [`crate::app`] where it can be driven by the fixture
//! scanner in tests.

pub mod aggregate;
pub mod app;
pub mod bthome;
pub mod diagnose;
pub mod mac_address;
pub mod measurement;
pub mod metrics;
pub mod output;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use aggregate::{UnparsedDevice, aggregate};
pub use bthome::{DecodeError, decode};
pub use diagnose::{DiagnoseOptions, Diagnostics};
pub use mac_address::MacAddress;
pub use measurement::{Measurements, Quantity};
pub use metrics::{Gauge, GaugeRegistry, MetricsSink};
pub use output::OutputFormatter;
pub use output::prometheus::ExpositionFormatter;
pub use registry::{Device, DeviceRegistry, KnownDevices, parse_device};
pub use scanner::{Advertisement, Backend, ScanError, Scanner};
pub use scheduler::{Schedule, Scheduler};
pub use status::{ScanStatus, StatusTracker};

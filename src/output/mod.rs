//! Output formatters for exported gauges.
//!
//! The scan loop writes into a [`GaugeRegistry`]; formatters turn a point-in-time
//! view of it plus the current [`ScanStatus`] into text for an external
//! collector. Only Prometheus text exposition is implemented.

pub mod prometheus;

use crate::metrics::GaugeRegistry;
use crate::status::ScanStatus;

/// Trait for rendering the exporter's current state.
pub trait OutputFormatter: Send + Sync {
    /// Render all gauges and the scan status.
    fn format(&self, gauges: &GaugeRegistry, status: &ScanStatus) -> String;
}

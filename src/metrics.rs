//! Per-device gauges fed by the scheduler.
//!
//! The scheduler only sees the [`MetricsSink`] contract. [`GaugeRegistry`] is the
//! in-process implementation: one table of gauges guarded by a read/write lock,
//! so renderers can read while the scan loop records.

use crate::measurement::{Measurements, Quantity};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Destination for merged per-device readings.
pub trait MetricsSink: Send + Sync {
    /// Record the latest readings for `device`.
    ///
    /// The last-update timestamp and seen flag are always touched; quantity
    /// gauges only for quantities present in `measurements`.
    fn record(&self, device: &str, measurements: &Measurements);
}

/// A gauge family: name, help text, and one value per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Gauge {
    Temperature,
    Humidity,
    Battery,
    LastUpdate,
    Seen,
}

impl Gauge {
    pub const ALL: [Gauge; 5] = [
        Gauge::Temperature,
        Gauge::Humidity,
        Gauge::Battery,
        Gauge::LastUpdate,
        Gauge::Seen,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Gauge::Temperature => "ble_sensor_temperature_celsius",
            Gauge::Humidity => "ble_sensor_humidity_percent",
            Gauge::Battery => "ble_sensor_battery_percent",
            Gauge::LastUpdate => "ble_sensor_last_update_timestamp_seconds",
            Gauge::Seen => "ble_sensor_seen",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Gauge::Temperature => "Temperature reading in Celsius",
            Gauge::Humidity => "Relative humidity reading in percent",
            Gauge::Battery => "Battery level in percent",
            Gauge::LastUpdate => "Unix timestamp of last sensor update",
            Gauge::Seen => "Constant value 1 indicating device was seen in latest scan",
        }
    }

    fn for_quantity(quantity: Quantity) -> Self {
        match quantity {
            Quantity::Temperature => Gauge::Temperature,
            Quantity::Humidity => Gauge::Humidity,
            Quantity::Battery => Gauge::Battery,
        }
    }
}

/// Point-in-time values for every gauge family, keyed by device name.
pub type GaugeSnapshot = BTreeMap<Gauge, BTreeMap<String, f64>>;

/// In-memory gauge table. Last write wins per (gauge, device).
#[derive(Debug, Default)]
pub struct GaugeRegistry {
    gauges: RwLock<GaugeSnapshot>,
}

impl GaugeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one gauge for one device.
    pub fn get(&self, gauge: Gauge, device: &str) -> Option<f64> {
        self.gauges.read().get(&gauge)?.get(device).copied()
    }

    /// Copy of the whole table, taken under one read lock.
    pub fn snapshot(&self) -> GaugeSnapshot {
        self.gauges.read().clone()
    }

    fn record_at(&self, device: &str, measurements: &Measurements, now: f64) {
        let mut gauges = self.gauges.write();
        let mut set = |gauge: Gauge, value: f64| {
            gauges
                .entry(gauge)
                .or_default()
                .insert(device.to_string(), value);
        };

        for (quantity, value) in measurements.iter() {
            set(Gauge::for_quantity(quantity), value);
        }
        set(Gauge::LastUpdate, now);
        set(Gauge::Seen, 1.0);
    }
}

impl MetricsSink for GaugeRegistry {
    fn record(&self, device: &str, measurements: &Measurements) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.record_at(device, measurements, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn readings(pairs: &[(Quantity, f64)]) -> Measurements {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_record_sets_present_quantities() {
        let registry = GaugeRegistry::new();
        registry.record_at(
            "living_room",
            &readings(&[(Quantity::Temperature, 21.5), (Quantity::Humidity, 65.4)]),
            1_700_000_000.0,
        );

        assert_eq!(registry.get(Gauge::Temperature, "living_room"), Some(21.5));
        assert_eq!(registry.get(Gauge::Humidity, "living_room"), Some(65.4));
        assert_eq!(registry.get(Gauge::Battery, "living_room"), None);
        assert_eq!(
            registry.get(Gauge::LastUpdate, "living_room"),
            Some(1_700_000_000.0)
        );
        assert_eq!(registry.get(Gauge::Seen, "living_room"), Some(1.0));
    }

    #[test]
    fn test_record_keeps_previous_values_for_absent_quantities() {
        let registry = GaugeRegistry::new();
        registry.record("bedroom", &readings(&[(Quantity::Battery, 80.0)]));
        registry.record("bedroom", &readings(&[(Quantity::Temperature, 18.5)]));

        assert_eq!(registry.get(Gauge::Battery, "bedroom"), Some(80.0));
        assert_eq!(registry.get(Gauge::Temperature, "bedroom"), Some(18.5));
    }

    #[test]
    fn test_record_last_call_wins() {
        let registry = GaugeRegistry::new();
        registry.record("bedroom", &readings(&[(Quantity::Temperature, 18.5)]));
        registry.record("bedroom", &readings(&[(Quantity::Temperature, 19.0)]));

        assert_eq!(registry.get(Gauge::Temperature, "bedroom"), Some(19.0));
        assert!(registry.get(Gauge::LastUpdate, "bedroom").unwrap() > 0.0);
    }

    #[test]
    fn test_record_empty_measurements_touches_tracking_gauges() {
        let registry = GaugeRegistry::new();
        registry.record("attic", &Measurements::new());

        assert_eq!(registry.get(Gauge::Seen, "attic"), Some(1.0));
        assert!(registry.get(Gauge::LastUpdate, "attic").is_some());
        assert_eq!(registry.snapshot().get(&Gauge::Temperature), None);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let registry = Arc::new(GaugeRegistry::new());

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..100 {
                    registry.record("device1", &readings(&[(Quantity::Temperature, f64::from(i))]));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let snapshot = registry.snapshot();
                        if let Some(temps) = snapshot.get(&Gauge::Temperature) {
                            // every recorded device also has its tracking gauges
                            assert!(snapshot[&Gauge::Seen].contains_key("device1"));
                            assert!(temps["device1"] < 100.0);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.get(Gauge::Temperature, "device1"), Some(99.0));
    }
}

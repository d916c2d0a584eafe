//! Known-device registry.
//!
//! Maps device identifiers to the human-readable names used as the `device`
//! label on exported gauges. Only devices listed here are ever decoded or
//! reported.

use crate::mac_address::MacAddress;
use std::collections::{BTreeMap, HashSet};

/// A configured device: its address and display name.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Canonical device identifier (e.g., "A4:C1:38:11:22:33")
    pub id: String,
    /// The display name (e.g., "living_room")
    pub name: String,
}

/// Parse a device from a string in the format "MAC=NAME".
///
/// The address is validated and canonicalised to upper case so it matches the
/// identifiers produced by the scan backends.
///
/// # Example
/// ```
/// use ble_sensor_exporter::registry::parse_device;
///
/// let device = parse_device("a4:c1:38:11:22:33=Kitchen").unwrap();
/// assert_eq!(device.id, "A4:C1:38:11:22:33");
/// assert_eq!(device.name, "Kitchen");
/// ```
pub fn parse_device(src: &str) -> Result<Device, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid device: expected format MAC=NAME".to_string())?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid device: empty name for {address}"));
    }

    let mac: MacAddress = address.parse().map_err(|e| format!("{e}"))?;
    Ok(Device {
        id: mac.device_id(),
        name: name.to_string(),
    })
}

/// Membership test used by the aggregator to filter advertisements.
pub trait KnownDevices {
    fn is_known(&self, id: &str) -> bool;
}

impl KnownDevices for HashSet<String> {
    fn is_known(&self, id: &str) -> bool {
        self.contains(id)
    }
}

/// Read-only lookup from device identifier to display name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, String>,
}

impl DeviceRegistry {
    /// Build a registry; a later entry for the same identifier replaces an earlier one.
    pub fn new(devices: &[Device]) -> Self {
        Self {
            devices: devices
                .iter()
                .map(|d| (d.id.clone(), d.name.clone()))
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Display name for `id`, if the device is known.
    pub fn name(&self, id: &str) -> Option<&str> {
        self.devices.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.devices.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }
}

impl KnownDevices for DeviceRegistry {
    fn is_known(&self, id: &str) -> bool {
        self.contains(id)
    }
}

//! Per-window aggregation of advertisements.
//!
//! Sensors often split their readings across packets (temperature and humidity
//! in one, battery in the next), so everything seen for a device during one
//! acquisition window is decoded and merged before it is reported.

use crate::bthome;
use crate::measurement::Measurements;
use crate::registry::KnownDevices;
use crate::scanner::Advertisement;
use std::collections::BTreeMap;
use std::fmt;

/// A known device whose every packet in the window failed to decode.
///
/// Usually points at a firmware or format mismatch rather than a device that
/// is simply out of range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnparsedDevice {
    pub id: String,
    /// Number of packets seen from the device in the window
    pub packets: usize,
}

impl fmt::Display for UnparsedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all {} packets from {} failed to parse",
            self.packets, self.id
        )
    }
}

/// Decode and merge one window of advertisements.
///
/// Advertisements from devices `known` does not recognise are dropped before
/// decoding. For each remaining device, payloads are decoded in arrival order
/// and merged so that the latest successful payload wins per quantity. Payloads
/// that fail to decode are dropped; `warn` is called once for each device none
/// of whose payloads decoded, in ascending id order.
///
/// Devices with at least one decoded payload appear in the returned map.
pub fn aggregate<K, W>(
    advertisements: &[Advertisement],
    known: &K,
    mut warn: W,
) -> BTreeMap<String, Measurements>
where
    K: KnownDevices + ?Sized,
    W: FnMut(UnparsedDevice),
{
    let mut grouped: BTreeMap<&str, Vec<&[u8]>> = BTreeMap::new();
    for adv in advertisements {
        if known.is_known(&adv.id) {
            grouped
                .entry(adv.id.as_str())
                .or_default()
                .push(adv.payload.as_slice());
        }
    }

    let mut merged = BTreeMap::new();
    for (id, payloads) in grouped {
        let mut readings: Option<Measurements> = None;
        for payload in &payloads {
            if let Ok(decoded) = bthome::decode(payload) {
                match readings.as_mut() {
                    Some(r) => r.merge(decoded),
                    None => readings = Some(decoded),
                }
            }
        }

        match readings {
            Some(r) if !r.is_empty() => {
                merged.insert(id.to_string(), r);
            }
            Some(_) => {}
            None => warn(UnparsedDevice {
                id: id.to_string(),
                packets: payloads.len(),
            }),
        }
    }

    merged
}

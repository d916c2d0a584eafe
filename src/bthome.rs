//! BTHome v2 service data decoder.
//!
//! A payload starts with one device-info byte followed by a sequence of
//! `(object id, value)` records. Only the objects the exporter reports are
//! decoded; everything else is skipped by its declared width.
//! See: https://bthome.io/format/
//!
//! The width table below is partial. Unlisted object ids are skipped as a
//! single byte, so an unlisted multi-byte object misaligns the rest of the
//! payload.

use crate::measurement::{Measurements, Quantity};
use std::fmt;
use thiserror::Error;

/// Smallest decodable payload: device-info byte plus one object id.
pub const MIN_PAYLOAD_LEN: usize = 2;

/// Battery voltage that maps to 0 %.
const BATTERY_EMPTY_VOLTS: f64 = 2.0;
/// Battery voltage that maps to 100 %.
const BATTERY_FULL_VOLTS: f64 = 3.0;

/// The field a truncated object was meant to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    Humidity,
    Battery,
    Voltage,
    /// An object the decoder skips
    Object(u8),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Temperature => f.write_str("temperature"),
            Field::Humidity => f.write_str("humidity"),
            Field::Battery => f.write_str("battery"),
            Field::Voltage => f.write_str("voltage"),
            Field::Object(id) => write!(f, "object 0x{id:02X}"),
        }
    }
}

/// Reasons a payload could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("packet too short to be valid BTHome ({0} bytes)")]
    TooShort(usize),
    #[error("incomplete {0} data")]
    IncompleteField(Field),
    #[error("no valid sensor data found in packet")]
    NoData,
}

/// How one object id is handled.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Object {
    Temperature,
    Humidity,
    Battery,
    Voltage,
    Skip { id: u8, width: usize },
}

impl Object {
    fn from_id(id: u8) -> Self {
        match id {
            0x02 => Object::Temperature,
            0x03 => Object::Humidity,
            0x0A => Object::Battery,
            0x0C => Object::Voltage,
            0x10 => Object::Skip { id, width: 3 },
            0x04 | 0x0E | 0x0F | 0x11 => Object::Skip { id, width: 2 },
            // 0x00, 0x01, 0x05..=0x09, 0x0B, 0x0D and anything unknown
            _ => Object::Skip { id, width: 1 },
        }
    }

    fn width(&self) -> usize {
        match self {
            Object::Temperature | Object::Humidity | Object::Voltage => 2,
            Object::Battery => 1,
            Object::Skip { width, .. } => *width,
        }
    }

    fn field(&self) -> Field {
        match self {
            Object::Temperature => Field::Temperature,
            Object::Humidity => Field::Humidity,
            Object::Battery => Field::Battery,
            Object::Voltage => Field::Voltage,
            Object::Skip { id, .. } => Field::Object(*id),
        }
    }
}

#[inline]
fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Map a battery voltage in millivolts onto a 0-100 % charge estimate.
pub fn battery_percent_from_millivolts(millivolts: u16) -> f64 {
    let volts = f64::from(millivolts) / 1000.0;
    let percent =
        (volts - BATTERY_EMPTY_VOLTS) / (BATTERY_FULL_VOLTS - BATTERY_EMPTY_VOLTS) * 100.0;
    round_to(percent.clamp(0.0, 100.0), 1)
}

/// Decode a BTHome v2 payload into the reported quantities.
///
/// # Errors
/// - [`DecodeError::TooShort`] for payloads under [`MIN_PAYLOAD_LEN`] bytes
/// - [`DecodeError::IncompleteField`] when an object is cut off
/// - [`DecodeError::NoData`] when no temperature, humidity or battery was present
///
/// # Example
/// ```
/// use ble_sensor_exporter::bthome::decode;
/// use ble_sensor_exporter::Quantity;
///
/// let m = decode(&[0x40, 0x02, 0x66, 0x08, 0x0A, 0x55]).unwrap();
/// assert_eq!(m.get(Quantity::Temperature), Some(21.5));
/// assert_eq!(m.get(Quantity::Battery), Some(85.0));
/// ```
pub fn decode(payload: &[u8]) -> Result<Measurements, DecodeError> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TooShort(payload.len()));
    }

    let mut measurements = Measurements::new();
    let mut rest = &payload[1..];

    while let Some((&id, tail)) = rest.split_first() {
        let object = Object::from_id(id);
        let width = object.width();
        if tail.len() < width {
            return Err(DecodeError::IncompleteField(object.field()));
        }
        let (value, next) = tail.split_at(width);

        match object {
            Object::Temperature => {
                let raw = i16::from_le_bytes([value[0], value[1]]);
                measurements.insert(Quantity::Temperature, round_to(f64::from(raw) * 0.01, 2));
            }
            Object::Humidity => {
                let raw = u16::from_le_bytes([value[0], value[1]]);
                measurements.insert(Quantity::Humidity, round_to(f64::from(raw) * 0.01, 2));
            }
            Object::Battery => {
                measurements.insert(Quantity::Battery, f64::from(value[0]));
            }
            Object::Voltage => {
                let millivolts = u16::from_le_bytes([value[0], value[1]]);
                measurements.insert(
                    Quantity::Battery,
                    battery_percent_from_millivolts(millivolts),
                );
            }
            Object::Skip { .. } => {}
        }

        rest = next;
    }

    if measurements.is_empty() {
        return Err(DecodeError::NoData);
    }

    Ok(measurements)
}

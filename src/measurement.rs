//! Decoded sensor quantities.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of quantities the exporter reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    /// Temperature in Celsius
    Temperature,
    /// Relative humidity in percent
    Humidity,
    /// Battery level in percent (0-100)
    Battery,
}

impl Quantity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Battery => "battery",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Temperature => "°C",
            Quantity::Humidity | Quantity::Battery => "%",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readings for one device, at most one value per [`Quantity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Measurements(BTreeMap<Quantity, f64>);

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any earlier one for the same quantity.
    pub fn insert(&mut self, quantity: Quantity, value: f64) {
        self.0.insert(quantity, value);
    }

    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        self.0.get(&quantity).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Quantity, f64)> + '_ {
        self.0.iter().map(|(q, v)| (*q, *v))
    }

    /// Overlay `later` on top of `self`; values from `later` win per quantity.
    pub fn merge(&mut self, later: Measurements) {
        self.0.extend(later.0);
    }
}

impl FromIterator<(Quantity, f64)> for Measurements {
    fn from_iter<I: IntoIterator<Item = (Quantity, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Measurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (quantity, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{quantity}={value}")?;
        }
        Ok(())
    }
}

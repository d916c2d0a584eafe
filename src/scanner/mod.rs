//! Windowed BLE scanning for BTHome advertisements.
//!
//! A [`Scanner`] listens for a bounded window and returns every BTHome service
//! data payload it saw, tagged with the sender's device identifier. Decoding
//! happens later, in the aggregator, so a scanner never interprets payloads.
//!
//! The backend is chosen once at startup from [`Backend`]: BlueZ over D-Bus,
//! raw HCI sockets, or a fixture that replays preloaded advertisements.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

pub mod fixture;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use fixture::{FixtureScanner, parse_fixture};

/// BTHome 16-bit service UUID (0xFCD2).
///
/// See: https://bthome.io/format/
pub const BTHOME_SERVICE_UUID16: u16 = 0xFCD2;

/// Full 128-bit form of the BTHome service UUID, as reported by BlueZ.
#[cfg(feature = "bluer")]
pub const BTHOME_SERVICE_UUID: u128 = 0x0000fcd2_0000_1000_8000_00805f9b34fb;

/// One advertisement captured during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Canonical device identifier (upper-case MAC address)
    pub id: String,
    /// BTHome service data, starting with the device-info byte
    pub payload: Vec<u8>,
    /// Received signal strength in dBm, when the backend reports it
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Malformed `--fixture` entry
    #[error("Invalid fixture: {0}")]
    InvalidFixture(String),
}

/// Boxed future returned by [`Scanner::scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Advertisement>, ScanError>> + Send + 'a>>;

/// A source of advertisements, scanned one window at a time.
///
/// Implementations should not return materially before `duration` has elapsed,
/// and must not hold the caller much longer than that.
pub trait Scanner: Send + Sync {
    fn scan(&self, duration: Duration) -> ScanFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    #[value(alias = "raw")]
    Hci,
    /// Replay advertisements given with --fixture (no hardware)
    #[value(alias = "mock")]
    Fixture,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        return Backend::Fixture;
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            Backend::Fixture => write!(f, "fixture"),
        }
    }
}

/// Build the scanner for `backend`.
///
/// `fixture` is only used by [`Backend::Fixture`].
pub fn for_backend(backend: Backend, fixture: Vec<Advertisement>) -> Box<dyn Scanner> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Box::new(bluer::BluerScanner::default()),
        #[cfg(feature = "hci")]
        Backend::Hci => Box::new(hci::HciScanner::default()),
        Backend::Fixture => Box::new(FixtureScanner::new(fixture)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter not found".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter not found");

        let err = ScanError::InvalidFixture("expected MAC=HEX".to_string());
        assert_eq!(err.to_string(), "Invalid fixture: expected MAC=HEX");
    }

    #[test]
    fn test_backend_value_names() {
        assert_eq!(Backend::from_str("fixture", true), Ok(Backend::Fixture));
        assert_eq!(Backend::from_str("Mock", true), Ok(Backend::Fixture));
        assert!(Backend::from_str("invalid", true).is_err());
        assert_eq!(format!("{}", Backend::Fixture), "fixture");
    }

    #[cfg(feature = "bluer")]
    #[test]
    fn test_bluer_backend_value_names() {
        assert_eq!(Backend::from_str("bluer", true), Ok(Backend::Bluer));
        assert_eq!(Backend::from_str("bluez", true), Ok(Backend::Bluer));
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(Backend::default(), Backend::Bluer);
    }

    #[cfg(feature = "hci")]
    #[test]
    fn test_hci_backend_value_names() {
        assert_eq!(Backend::from_str("hci", true), Ok(Backend::Hci));
        assert_eq!(Backend::from_str("raw", true), Ok(Backend::Hci));
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }

    #[test]
    fn test_advertisement_rssi() {
        let adv = Advertisement::new("A4:C1:38:11:22:33", vec![0x40]);
        assert_eq!(adv.rssi, None);
        assert_eq!(adv.with_rssi(-67).rssi, Some(-67));
    }

    #[tokio::test(start_paused = true)]
    async fn test_for_backend_fixture_replays_entries() {
        let entries = vec![Advertisement::new("A4:C1:38:11:22:33", vec![0x40, 0x0A, 0x55])];
        let scanner = for_backend(Backend::Fixture, entries.clone());
        assert_eq!(scanner.scan(Duration::from_secs(1)).await.unwrap(), entries);
    }
}

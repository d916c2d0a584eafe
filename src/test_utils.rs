use crate::mac_address::MacAddress;
use crate::scanner::Advertisement;
use std::io;
use std::sync::{Arc, Mutex};

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x11, 0x22, 0x33]);

/// A second known device.
pub const OTHER_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x44, 0x55, 0x66]);

/// Build an advertisement from `mac` carrying `payload`.
pub fn advertisement(mac: MacAddress, payload: &[u8]) -> Advertisement {
    Advertisement::new(mac.device_id(), payload.to_vec())
}

/// Encodes BTHome v2 payloads object by object.
///
/// Tests only set the objects they care about.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    bytes: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        // BTHome v2, no encryption, regular advertising
        Self { bytes: vec![0x40] }
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        let raw = (celsius * 100.0).round() as i16;
        self.bytes.push(0x02);
        self.bytes.extend_from_slice(&raw.to_le_bytes());
        self
    }

    pub fn humidity(mut self, percent: f64) -> Self {
        let raw = (percent * 100.0).round() as u16;
        self.bytes.push(0x03);
        self.bytes.extend_from_slice(&raw.to_le_bytes());
        self
    }

    pub fn battery(mut self, percent: u8) -> Self {
        self.bytes.extend_from_slice(&[0x0A, percent]);
        self
    }

    /// Encode a battery percentage as the equivalent 0x0C voltage object.
    pub fn battery_voltage(mut self, percent: f64) -> Self {
        let millivolts = (2000.0 + percent * 10.0).round() as u16;
        self.bytes.push(0x0C);
        self.bytes.extend_from_slice(&millivolts.to_le_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Shared buffer that collects formatted log output.
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route `tracing` events on the current thread into a fresh buffer until the guard drops.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

//! Fixture backend: replays a fixed set of advertisements every window.
//!
//! Useful for running the exporter without Bluetooth hardware and for driving
//! the scheduler deterministically in tests.

use super::{Advertisement, ScanError, ScanFuture, Scanner};
use crate::mac_address::MacAddress;
use std::time::Duration;

/// Returns the same advertisements after waiting out each scan window.
#[derive(Debug, Clone, Default)]
pub struct FixtureScanner {
    advertisements: Vec<Advertisement>,
}

impl FixtureScanner {
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self { advertisements }
    }
}

impl Scanner for FixtureScanner {
    fn scan(&self, duration: Duration) -> ScanFuture<'_> {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Ok(self.advertisements.clone())
        })
    }
}

/// Parse a fixture advertisement from "MAC=HEXPAYLOAD".
///
/// # Example
/// ```
/// use ble_sensor_exporter::scanner::parse_fixture;
///
/// let adv = parse_fixture("a4:c1:38:11:22:33=40020a08").unwrap();
/// assert_eq!(adv.id, "A4:C1:38:11:22:33");
/// assert_eq!(adv.payload, vec![0x40, 0x02, 0x0a, 0x08]);
/// ```
pub fn parse_fixture(src: &str) -> Result<Advertisement, ScanError> {
    let (address, payload) = src
        .split_once('=')
        .ok_or_else(|| ScanError::InvalidFixture(format!("expected MAC=HEX, got '{src}'")))?;

    let mac: MacAddress = address
        .parse()
        .map_err(|e| ScanError::InvalidFixture(format!("{e}")))?;
    let payload = hex::decode(payload.trim())
        .map_err(|e| ScanError::InvalidFixture(format!("payload for {mac}: {e}")))?;

    Ok(Advertisement::new(mac.device_id(), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fixture_waits_for_window() {
        let scanner = FixtureScanner::new(vec![Advertisement::new("AA:BB:CC:DD:EE:FF", vec![1, 2])]);

        let start = Instant::now();
        let first = scanner.scan(Duration::from_secs(5)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        let second = scanner.scan(Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixture_empty() {
        let scanner = FixtureScanner::default();
        let adv = tokio_test::assert_ok!(scanner.scan(Duration::from_secs(1)).await);
        assert!(adv.is_empty());
    }

    #[test]
    fn test_parse_fixture_invalid() {
        assert!(matches!(
            parse_fixture("A4:C1:38:11:22:33"),
            Err(ScanError::InvalidFixture(_))
        ));
        assert!(matches!(
            parse_fixture("A4:C1:38=4002"),
            Err(ScanError::InvalidFixture(_))
        ));
        let err = parse_fixture("A4:C1:38:11:22:33=40zz").unwrap_err();
        assert!(err.to_string().starts_with("Invalid fixture: payload for A4:C1:38:11:22:33"));
    }
}

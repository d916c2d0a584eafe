//! BlueZ D-Bus backend for BTHome scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ keeps a cache of previously seen devices and reports all of them when
//! discovery starts, along with whatever service data it last stored. Only
//! data BlueZ refreshed during the window is collected: a device reported at
//! discovery start counts only if it already has an RSSI, and after that each
//! service data or RSSI change on a watched device counts as one advertisement.

use super::{Advertisement, BTHOME_SERVICE_UUID, ScanError, ScanFuture, Scanner};
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session, Uuid,
};
use futures::stream::{SelectAll, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, trace};

/// Property changes of one watched device, tagged with its address.
type DeviceEvents = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner backed by the default BlueZ adapter.
///
/// A fresh D-Bus session is opened for every window, so a restarted
/// `bluetoothd` is picked up on the next scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct BluerScanner;

impl Scanner for BluerScanner {
    fn scan(&self, duration: Duration) -> ScanFuture<'_> {
        Box::pin(scan_window(duration))
    }
}

/// Adapter and session errors fail the window; per-device errors only skip that device.
async fn scan_window(duration: Duration) -> Result<Vec<Advertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    // Duplicate data keeps BlueZ reporting every advertisement, not just the
    // first one per device.
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            uuids: [Uuid::from_u128(BTHOME_SERVICE_UUID)].into(),
            ..Default::default()
        })
        .await?;

    let discovery = adapter.discover_devices().await?;
    tokio::pin!(discovery);

    let mut watched: HashMap<Address, Device> = HashMap::new();
    let mut device_events: SelectAll<DeviceEvents> = SelectAll::new();
    let mut advertisements = Vec::new();
    let window = tokio::time::sleep(duration);
    tokio::pin!(window);

    loop {
        tokio::select! {
            _ = &mut window => break,
            event = discovery.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) if !watched.contains_key(&address) => {
                    match watch_device(&adapter, address).await {
                        Ok((device, events, adv)) => {
                            watched.insert(address, device);
                            device_events.push(events);
                            advertisements.extend(adv);
                        }
                        Err(e) => debug!(%address, "skipping device: {e}"),
                    }
                }
                Some(AdapterEvent::DeviceRemoved(address)) => {
                    watched.remove(&address);
                }
                Some(_) => {}
                None => break,
            },
            Some((address, event)) = device_events.next(), if !device_events.is_empty() => {
                let adv = match event {
                    DeviceEvent::PropertyChanged(DeviceProperty::ServiceData(service_data)) => {
                        bthome_payload(&service_data)
                            .map(|payload| advertisement(address, payload.to_vec(), None))
                    }
                    DeviceEvent::PropertyChanged(DeviceProperty::Rssi(rssi)) => match watched.get(&address) {
                        Some(device) => match device.service_data().await {
                            Ok(service_data) => fresh_payload(Some(rssi), service_data.as_ref())
                                .map(|payload| advertisement(address, payload, Some(rssi))),
                            Err(e) => {
                                debug!(%address, "unable to read service data: {e}");
                                None
                            }
                        },
                        None => None,
                    },
                    _ => None,
                };
                if let Some(adv) = adv {
                    trace!(id = %adv.id, "BTHome advertisement");
                    advertisements.push(adv);
                }
            }
        }
    }

    // Dropping the discovery stream ends discovery on the adapter.
    Ok(advertisements)
}

/// Subscribe to `address` and return what it advertised if BlueZ heard it this window.
async fn watch_device(
    adapter: &Adapter,
    address: Address,
) -> bluer::Result<(Device, DeviceEvents, Option<Advertisement>)> {
    let device = adapter.device(address)?;
    // subscribe before reading so no change in between is missed
    let events: DeviceEvents = Box::pin(device.events().await?.map(move |e| (address, e)));

    let rssi = device.rssi().await?;
    let adv = match rssi {
        Some(_) => fresh_payload(rssi, device.service_data().await?.as_ref())
            .map(|payload| advertisement(address, payload, rssi)),
        None => {
            trace!(%address, "cached device without RSSI, waiting for an advertisement");
            None
        }
    };

    Ok((device, events, adv))
}

fn bthome_payload(service_data: &HashMap<Uuid, Vec<u8>>) -> Option<&[u8]> {
    service_data
        .get(&Uuid::from_u128(BTHOME_SERVICE_UUID))
        .map(Vec::as_slice)
}

/// The BTHome payload of a device, provided BlueZ currently reports an RSSI for it.
///
/// BlueZ drops the RSSI of devices it has not heard since discovery started,
/// while their service data stays cached.
fn fresh_payload(
    rssi: Option<i16>,
    service_data: Option<&HashMap<Uuid, Vec<u8>>>,
) -> Option<Vec<u8>> {
    rssi?;
    service_data.and_then(bthome_payload).map(<[u8]>::to_vec)
}

fn advertisement(address: Address, payload: Vec<u8>, rssi: Option<i16>) -> Advertisement {
    let mac: MacAddress = address.into();
    let adv = Advertisement::new(mac.device_id(), payload);
    match rssi {
        Some(rssi) => adv.with_rssi(rssi),
        None => adv,
    }
}

//! Raw HCI socket backend for BTHome scanning.
//!
//! This backend uses raw Linux HCI sockets to run a passive LE scan without
//! the BlueZ daemon. It requires CAP_NET_RAW and CAP_NET_ADMIN capabilities
//! or root privileges.

use super::{Advertisement, BTHOME_SERVICE_UUID16, ScanError, ScanFuture, Scanner};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan parameters
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// Scan interval and window, in 0.625 ms units (10 ms)
const LE_SCAN_TIMING: u16 = 0x0010;

/// AD type: Service Data - 16-bit UUID
const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;

/// Largest HCI event: 1 byte packet type + 2 byte header + 255 byte parameters
const HCI_MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Filter that passes LE meta events only.
    fn le_meta_events() -> Self {
        let mut filter = Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: passive scan, public address, accept all.
fn scan_parameters_packet() -> Vec<u8> {
    let timing = LE_SCAN_TIMING.to_le_bytes();
    let params = [
        LE_SCAN_PASSIVE,
        timing[0],
        timing[1],
        timing[0],
        timing[1],
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ];
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable, never filtering duplicates.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one adapter.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send(&self, packet: &[u8]) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }
}

/// Keeps LE scanning enabled on the adapter until dropped.
///
/// Dropping disables scanning even when the scan future is cancelled mid-window.
struct ActiveScan {
    socket: HciSocket,
}

impl ActiveScan {
    fn start(socket: HciSocket) -> Result<Self, ScanError> {
        socket.send(&scan_parameters_packet())?;
        socket.send(&scan_enable_packet(true))?;
        Ok(Self { socket })
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if let Err(e) = self.socket.send(&scan_enable_packet(false)) {
            tracing::warn!("failed to disable LE scan: {e}");
        }
    }
}

/// Find BTHome service data among the AD structures of one advertisement.
///
/// Returns the bytes following the 16-bit UUID.
fn find_bthome_service_data(ad_data: &[u8]) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            return None;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        if ad_type == AD_TYPE_SERVICE_DATA_UUID16
            && value.len() >= 2
            && u16::from_le_bytes([value[0], value[1]]) == BTHOME_SERVICE_UUID16
        {
            return Some(&value[2..]);
        }

        offset += 1 + len;
    }
    None
}

/// Parse an LE advertising report event and extract BTHome service data.
///
/// Only the first report of the event is inspected.
fn parse_advertising_report(event: &[u8]) -> Option<Advertisement> {
    if event.len() < 4
        || event[0] != HCI_EVENT_PKT
        || event[1] != EVT_LE_META_EVENT
        || event[3] != EVT_LE_ADVERTISING_REPORT
    {
        return None;
    }

    // num_reports(1) + event_type(1) + addr_type(1) + addr(6) + data_len(1)
    let report = &event[4..];
    if report.len() < 10 || report[0] == 0 {
        return None;
    }

    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    let mac = MacAddress::from_le_bytes(addr);

    let data_len = usize::from(report[9]);
    let ad_data = report.get(10..10 + data_len)?;

    let payload = find_bthome_service_data(ad_data)?;
    let adv = Advertisement::new(mac.device_id(), payload.to_vec());

    // the signed RSSI byte follows the advertising data
    Some(match report.get(10 + data_len) {
        Some(&rssi) => adv.with_rssi(i16::from(rssi as i8)),
        None => adv,
    })
}

/// Scanner using a raw HCI socket on one adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct HciScanner {
    /// Adapter index (0 for hci0)
    pub dev_id: u16,
}

impl Scanner for HciScanner {
    fn scan(&self, duration: Duration) -> ScanFuture<'_> {
        let dev_id = self.dev_id;
        Box::pin(async move { scan_window(dev_id, duration).await })
    }
}

async fn scan_window(dev_id: u16, duration: Duration) -> Result<Vec<Advertisement>, ScanError> {
    let events = HciSocket::open(dev_id)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    // Commands go through a separate socket so the event socket only ever
    // sees LE meta events.
    let _scan = ActiveScan::start(HciSocket::open(dev_id)?)?;

    let async_fd = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

    let mut advertisements = Vec::new();
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];
    let window = tokio::time::sleep(duration);
    tokio::pin!(window);

    loop {
        let mut guard = tokio::select! {
            _ = &mut window => break,
            ready = async_fd.readable() => ready
                .map_err(|e| ScanError::Bluetooth(format!("HCI socket error: {e}")))?,
        };

        // Drain all available packets before waiting again
        loop {
            let read = guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(inner.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len())
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            });

            match read {
                Ok(Ok(n)) if n > 0 => {
                    if let Some(adv) = parse_advertising_report(&buf[..n]) {
                        advertisements.push(adv);
                    }
                }
                Ok(Ok(_)) => break,
                Ok(Err(e)) => {
                    return Err(ScanError::Bluetooth(format!("HCI read failed: {e}")));
                }
                // WouldBlock - no more data
                Err(_would_block) => break,
            }
        }
    }

    Ok(advertisements)
}

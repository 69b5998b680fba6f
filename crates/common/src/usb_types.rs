//! USB type abstractions and utilities

use rusb::TransferType;
use std::fmt;
use tracing::{debug, warn};

/// Direction bit of an endpoint address (set = device to host)
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// Vendor/product pair identifying the target device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(protocol::ids::GARMIN_USB_VID, protocol::ids::GARMIN_USB_PID)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Endpoint roles resolved from the claimed interface
///
/// Roles are discovered from descriptor metadata rather than fixed numbers,
/// since firmware revisions number their endpoints differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointSet {
    pub bulk_in: Option<u8>,
    pub bulk_out: Option<u8>,
    pub interrupt_in: Option<u8>,
}

impl EndpointSet {
    /// Classify endpoints in descriptor order
    ///
    /// Bulk IN, bulk OUT and interrupt IN endpoints fill their role; interrupt
    /// OUT and every other transfer type are ignored. A later endpoint of the
    /// same role replaces an earlier one.
    pub fn classify<I>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = (u8, TransferType)>,
    {
        let mut set = Self::default();

        for (address, transfer_type) in endpoints {
            let is_in = address & ENDPOINT_DIR_IN != 0;
            let (slot, role) = match (transfer_type, is_in) {
                (TransferType::Bulk, true) => (&mut set.bulk_in, "bulk IN"),
                (TransferType::Bulk, false) => (&mut set.bulk_out, "bulk OUT"),
                (TransferType::Interrupt, true) => (&mut set.interrupt_in, "interrupt IN"),
                _ => continue,
            };

            if let Some(previous) = slot.replace(address) {
                warn!(
                    "Duplicate {} endpoint: {:#04x} replaces {:#04x}",
                    role, address, previous
                );
            } else {
                debug!("{} = {:#04x}", role, address);
            }
        }

        set
    }

    pub fn is_empty(&self) -> bool {
        self.bulk_in.is_none() && self.bulk_out.is_none() && self.interrupt_in.is_none()
    }
}

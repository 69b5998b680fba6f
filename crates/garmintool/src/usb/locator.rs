//! Device discovery and claiming
//!
//! Finds the first attached unit matching the configured VID/PID, opens it,
//! selects configuration 1, claims interface 0 and resolves its endpoints.
//! Each step is a hard gate: a failure releases whatever was acquired and the
//! device stays closed.

use crate::usb::context::UsbContextCell;
use crate::usb::kernel::KernelDriverCheck;
use crate::usb::transfers::UsbLink;
use common::{DeviceIdentity, EndpointSet, OpenError};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration value selected on the unit
pub const GARMIN_CONFIGURATION: u8 = 1;

/// Interface carrying the packet protocol
pub const GARMIN_INTERFACE: u8 = 0;

/// Source of claimed devices for a session
pub trait DeviceOpener {
    type Link: UsbLink;

    /// Locate, open and claim the device
    ///
    /// All failures collapse to `None`; nothing acquired along the way is kept.
    fn find_and_claim(&mut self) -> Option<(Self::Link, EndpointSet)>;
}

/// A device found on the bus but not opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedDevice {
    pub bus_number: u8,
    pub address: u8,
    pub identity: DeviceIdentity,
}

/// Finds and claims the unit over libusb
pub struct DeviceLocator {
    context: UsbContextCell,
    identity: DeviceIdentity,
    kernel_check: Box<dyn KernelDriverCheck>,
}

impl DeviceLocator {
    pub fn new(
        context: UsbContextCell,
        identity: DeviceIdentity,
        kernel_check: Box<dyn KernelDriverCheck>,
    ) -> Self {
        Self {
            context,
            identity,
            kernel_check,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Whether the libusb context has been created yet
    pub fn context_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    /// Locate, open and claim the device, reporting why it failed
    pub fn try_find_and_claim(&mut self) -> Result<(ClaimedDevice, EndpointSet), OpenError> {
        self.check_kernel()?;

        let identity = self.identity;
        let context = self.context.get_or_init().map_err(OpenError::Context)?;
        let devices = context.devices().map_err(OpenError::Enumerate)?;

        // Only one unit is ever used; the first match wins.
        let device = devices
            .iter()
            .find(|device| is_match(device, identity))
            .ok_or(OpenError::DeviceNotFound {
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
            })?;

        debug!(
            "Found {} at bus {:03} address {:03}",
            identity,
            device.bus_number(),
            device.address()
        );

        claim(&device)
    }

    /// List every attached device matching the identity without opening it
    pub fn list_matching(&mut self) -> Result<Vec<MatchedDevice>, OpenError> {
        self.check_kernel()?;

        let identity = self.identity;
        let context = self.context.get_or_init().map_err(OpenError::Context)?;
        let devices = context.devices().map_err(OpenError::Enumerate)?;

        Ok(devices
            .iter()
            .filter(|device| is_match(device, identity))
            .map(|device| MatchedDevice {
                bus_number: device.bus_number(),
                address: device.address(),
                identity,
            })
            .collect())
    }

    fn check_kernel(&self) -> Result<(), OpenError> {
        match self.kernel_check.conflicting_driver() {
            Some(module) => Err(OpenError::KernelConflict { module }),
            None => Ok(()),
        }
    }
}

impl DeviceOpener for DeviceLocator {
    type Link = ClaimedDevice;

    fn find_and_claim(&mut self) -> Option<(ClaimedDevice, EndpointSet)> {
        match self.try_find_and_claim() {
            Ok(claimed) => Some(claimed),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

fn is_match(device: &Device<Context>, identity: DeviceIdentity) -> bool {
    device
        .device_descriptor()
        .map(|desc| identity.matches(desc.vendor_id(), desc.product_id()))
        .unwrap_or(false)
}

/// Open the device, claim the protocol interface and resolve its endpoints
fn claim(device: &Device<Context>) -> Result<(ClaimedDevice, EndpointSet), OpenError> {
    let handle = device.open().map_err(OpenError::OpenFailed)?;
    debug!("Opened device");

    handle
        .set_active_configuration(GARMIN_CONFIGURATION)
        .map_err(|source| OpenError::ConfigurationFailed {
            config: GARMIN_CONFIGURATION,
            source,
        })?;
    debug!("Set configuration {}", GARMIN_CONFIGURATION);

    handle
        .claim_interface(GARMIN_INTERFACE)
        .map_err(|source| OpenError::ClaimFailed {
            interface: GARMIN_INTERFACE,
            source,
        })?;
    debug!("Claimed interface {}", GARMIN_INTERFACE);

    // From here on dropping `claimed` releases the interface and closes the handle.
    let claimed = ClaimedDevice {
        handle,
        released: false,
    };

    let config = device
        .active_config_descriptor()
        .map_err(|e| OpenError::EndpointResolutionFailed(e.to_string()))?;
    let interface = config.interfaces().next().ok_or_else(|| {
        OpenError::EndpointResolutionFailed("configuration has no interfaces".to_string())
    })?;
    let setting = interface.descriptors().next().ok_or_else(|| {
        OpenError::EndpointResolutionFailed("interface has no alternate settings".to_string())
    })?;

    let endpoints = EndpointSet::classify(
        setting
            .endpoint_descriptors()
            .map(|ep| (ep.address(), ep.transfer_type())),
    );
    if endpoints.is_empty() {
        return Err(OpenError::EndpointResolutionFailed(
            "no bulk or interrupt endpoints".to_string(),
        ));
    }

    info!(
        "Device claimed: bulk IN {:?}, bulk OUT {:?}, interrupt IN {:?}",
        endpoints.bulk_in, endpoints.bulk_out, endpoints.interrupt_in
    );
    Ok((claimed, endpoints))
}

/// An open device with the protocol interface claimed
pub struct ClaimedDevice {
    handle: DeviceHandle<Context>,
    released: bool,
}

impl UsbLink for ClaimedDevice {
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.read_interrupt(endpoint, buf, timeout)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, buf, timeout)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.handle.release_interface(GARMIN_INTERFACE) {
            warn!("Failed to release interface {}: {}", GARMIN_INTERFACE, e);
        } else {
            debug!("Released interface {}", GARMIN_INTERFACE);
        }
    }
}

impl Drop for ClaimedDevice {
    fn drop(&mut self) {
        self.release();
        debug!("Closed device");
    }
}

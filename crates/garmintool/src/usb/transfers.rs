//! USB transfer execution
//!
//! Single packet reads and writes over the endpoints resolved at claim time.
//! Reads use the interrupt IN endpoint unless the unit wants bulk reads;
//! writes always go to bulk OUT. Both block for at most [`TRANSFER_TIMEOUT`].

use common::{EndpointSet, TransferError};
use protocol::{PACKET_CAPACITY, Packet};
use std::time::Duration;
use tracing::debug;

/// Timeout for every interrupt and bulk transfer
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3);

/// The transfer primitives of a claimed device
pub trait UsbLink {
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;

    /// Release the claimed interface; the device closes when the link drops
    fn release(&mut self);
}

/// Read one packet worth of bytes
pub fn read_packet<L: UsbLink + ?Sized>(
    link: &L,
    endpoints: &EndpointSet,
    bulk: bool,
) -> Result<Vec<u8>, TransferError> {
    let mut buffer = vec![0u8; PACKET_CAPACITY];

    let len = if bulk {
        let endpoint = endpoints
            .bulk_in
            .ok_or(TransferError::MissingEndpoint("bulk IN"))?;
        link.read_bulk(endpoint, &mut buffer, TRANSFER_TIMEOUT)?
    } else {
        let endpoint = endpoints
            .interrupt_in
            .ok_or(TransferError::MissingEndpoint("interrupt IN"))?;
        link.read_interrupt(endpoint, &mut buffer, TRANSFER_TIMEOUT)?
    };

    debug!(
        "{} read: {} bytes",
        if bulk { "Bulk" } else { "Interrupt" },
        len
    );
    buffer.truncate(len);
    Ok(buffer)
}

/// Write a whole packet to bulk OUT
///
/// Anything other than the full wire length going out is a
/// [`TransferError::ShortWrite`].
pub fn write_packet<L: UsbLink + ?Sized>(
    link: &L,
    endpoints: &EndpointSet,
    packet: &Packet,
) -> Result<usize, TransferError> {
    let endpoint = endpoints
        .bulk_out
        .ok_or(TransferError::MissingEndpoint("bulk OUT"))?;
    let expected = packet.wire_len();

    let actual = link.write_bulk(endpoint, packet.as_bytes(), TRANSFER_TIMEOUT)?;
    if actual != expected {
        return Err(TransferError::ShortWrite { expected, actual });
    }

    debug!("Bulk write: {} bytes to {:#04x}", actual, endpoint);
    Ok(actual)
}

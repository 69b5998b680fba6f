//! Product identification records (A000 / A001)
//!
//! Returned by the unit in response to a product request: a product data
//! record, optional extended product strings, and the protocol capability
//! array.

use crate::error::{ProtocolError, Result};
use crate::ids::app;
use crate::packet::{Packet, get_i16, get_u16};
use std::fmt;

/// Product data record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductData {
    pub product_id: u16,
    /// Firmware version times 100
    pub software_version: i16,
    pub description: String,
    /// Strings following the description
    pub extra: Vec<String>,
}

impl ProductData {
    /// Decode a product data packet
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        expect_id(packet, app::PRODUCT_DATA)?;
        let payload = packet.payload();

        let (product_id, software_version) = match (get_u16(payload, 0), get_i16(payload, 2)) {
            (Some(id), Some(version)) => (id, version),
            _ => {
                return Err(ProtocolError::ShortPayload {
                    record: "product data",
                    len: payload.len(),
                });
            }
        };

        let mut strings = split_strings(&payload[4..]).into_iter();
        let description = strings.next().unwrap_or_default();

        Ok(Self {
            product_id,
            software_version,
            description,
            extra: strings.collect(),
        })
    }

    /// Firmware version formatted as `major.minor`
    pub fn software_version_string(&self) -> String {
        let version = self.software_version as i32;
        format!("{}.{:02}", version / 100, (version % 100).abs())
    }
}

/// Decode an extended product data packet into its strings
pub fn ext_product_strings(packet: &Packet) -> Result<Vec<String>> {
    expect_id(packet, app::EXT_PRODUCT_DATA)?;
    Ok(split_strings(packet.payload()))
}

/// One entry of the protocol capability array, e.g. `A010`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolEntry {
    pub tag: u8,
    pub data: u16,
}

impl fmt::Display for ProtocolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.tag as char, self.data)
    }
}

/// Decode a protocol array packet
///
/// A trailing partial entry is ignored.
pub fn protocol_array(packet: &Packet) -> Result<Vec<ProtocolEntry>> {
    expect_id(packet, app::PROTOCOL_ARRAY)?;
    Ok(packet
        .payload()
        .chunks_exact(3)
        .map(|entry| ProtocolEntry {
            tag: entry[0],
            data: u16::from_le_bytes([entry[1], entry[2]]),
        })
        .collect())
}

/// Everything the unit reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub product: ProductData,
    pub ext_strings: Vec<String>,
    pub protocols: Vec<ProtocolEntry>,
}

fn expect_id(packet: &Packet, expected: u16) -> Result<()> {
    if packet.id() != expected {
        return Err(ProtocolError::UnexpectedPacket {
            expected,
            actual: packet.id(),
        });
    }
    Ok(())
}

/// Split a buffer of NUL-terminated strings; an unterminated tail counts as a string
fn split_strings(buf: &[u8]) -> Vec<String> {
    buf.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

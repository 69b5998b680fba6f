//! Packet framing for the Garmin USB protocol
//!
//! Every transfer carries one packet: a fixed 12-byte header followed by a
//! variable-length payload.
//!
//! # Wire Format
//!
//! ```text
//! [type: u8][reserved: 3][id: u16 LE][reserved: 2][size: u32 LE][payload: size bytes]
//! ```
//!
//! All multi-byte fields are little-endian regardless of host byte order. This
//! module is the only place in the workspace that encodes or decodes them.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Size of the fixed packet header
pub const PACKET_HEADER_SIZE: usize = 12;

/// Largest packet (header + payload) a single transfer may carry
pub const PACKET_CAPACITY: usize = 1024;

/// Largest payload a packet may carry
pub const MAX_PAYLOAD_SIZE: usize = PACKET_CAPACITY - PACKET_HEADER_SIZE;

const TYPE_OFFSET: usize = 0;
const ID_OFFSET: usize = 6;
const SIZE_OFFSET: usize = 8;

/// Protocol layer a packet belongs to
///
/// Carried in the first header byte. The wire values are the vendor's:
/// 0x00 for the USB protocol layer and 0x14 for the application layer.
/// Units ignore packets tagged 1, so these must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// USB protocol layer (session setup, data-available notifications)
    UsbProtocol,
    /// Application layer (commands and records)
    Application,
    /// Any other type byte seen on the wire
    Unknown(u8),
}

impl PacketKind {
    /// Wire value of the USB protocol layer type byte
    pub const USB_PROTOCOL: u8 = 0x00;
    /// Wire value of the application layer type byte
    pub const APPLICATION: u8 = 0x14;

    /// Decode a header type byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::USB_PROTOCOL => PacketKind::UsbProtocol,
            Self::APPLICATION => PacketKind::Application,
            other => PacketKind::Unknown(other),
        }
    }

    /// Encode as a header type byte
    pub fn as_byte(self) -> u8 {
        match self {
            PacketKind::UsbProtocol => Self::USB_PROTOCOL,
            PacketKind::Application => Self::APPLICATION,
            PacketKind::Unknown(other) => other,
        }
    }
}

/// A single protocol packet, held as its exact wire image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Build a packet of the given kind
    ///
    /// Fails with [`ProtocolError::BufferTooSmall`] when the payload does not fit
    /// in [`PACKET_CAPACITY`]; the payload is never truncated.
    pub fn packetize(kind: PacketKind, id: u16, data: &[u8]) -> Result<Self> {
        let needed = data.len() + PACKET_HEADER_SIZE;
        if needed > PACKET_CAPACITY {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                available: PACKET_CAPACITY,
            });
        }

        let mut bytes = vec![0u8; needed];
        bytes[TYPE_OFFSET] = kind.as_byte();
        LittleEndian::write_u16(&mut bytes[ID_OFFSET..ID_OFFSET + 2], id);
        LittleEndian::write_u32(&mut bytes[SIZE_OFFSET..SIZE_OFFSET + 4], data.len() as u32);
        bytes[PACKET_HEADER_SIZE..].copy_from_slice(data);

        Ok(Self { bytes })
    }

    /// Build an application layer packet
    pub fn application(id: u16, data: &[u8]) -> Result<Self> {
        Self::packetize(PacketKind::Application, id, data)
    }

    /// Build a USB protocol layer packet
    pub fn usb_protocol(id: u16, data: &[u8]) -> Result<Self> {
        Self::packetize(PacketKind::UsbProtocol, id, data)
    }

    /// Decode a packet from a received buffer
    ///
    /// Bytes past the declared payload size are ignored.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader {
                expected: PACKET_HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let size = LittleEndian::read_u32(&buf[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize;
        let needed = size.saturating_add(PACKET_HEADER_SIZE);
        if needed > PACKET_CAPACITY {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                available: PACKET_CAPACITY,
            });
        }
        if buf.len() < needed {
            return Err(ProtocolError::IncompletePacket {
                expected: needed,
                actual: buf.len(),
            });
        }

        Ok(Self {
            bytes: buf[..needed].to_vec(),
        })
    }

    /// Raw header type byte
    pub fn packet_type(&self) -> u8 {
        self.bytes[TYPE_OFFSET]
    }

    /// Protocol layer of this packet
    pub fn kind(&self) -> PacketKind {
        PacketKind::from_byte(self.packet_type())
    }

    /// Packet id
    pub fn id(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[ID_OFFSET..ID_OFFSET + 2])
    }

    /// Payload size in bytes, as declared by the header
    pub fn size(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[SIZE_OFFSET..SIZE_OFFSET + 4])
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PACKET_HEADER_SIZE..]
    }

    /// Exact wire image (header + payload)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes this packet occupies on the wire
    pub fn wire_len(&self) -> usize {
        self.bytes.len()
    }

    /// True if this packet has the given kind and id
    pub fn is(&self, kind: PacketKind, id: u16) -> bool {
        self.kind() == kind && self.id() == id
    }
}

/// Read a little-endian `u16` at `offset`, if the buffer is long enough
pub fn get_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2).map(LittleEndian::read_u16)
}

/// Read a little-endian `i16` at `offset`, if the buffer is long enough
pub fn get_i16(buf: &[u8], offset: usize) -> Option<i16> {
    buf.get(offset..offset + 2).map(LittleEndian::read_i16)
}

/// Read a little-endian `u32` at `offset`, if the buffer is long enough
pub fn get_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4).map(LittleEndian::read_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let packet = Packet::application(0x1234, &[0xaa, 0xbb]).unwrap();
        assert_eq!(
            packet.as_bytes(),
            &[0x14, 0, 0, 0, 0, 0, 0x34, 0x12, 0x02, 0x00, 0x00, 0x00, 0xaa, 0xbb]
        );
    }

    #[test]
    fn test_reserved_bytes_zero() {
        let packet = Packet::usb_protocol(0xffff, &[]).unwrap();
        assert_eq!(&packet.as_bytes()[1..6], &[0, 0, 0, 0, 0]);
        assert_eq!(&packet.as_bytes()[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_explicit_kind() {
        let packet = Packet::usb_protocol(5, &[]).unwrap();
        assert_eq!(packet.kind(), PacketKind::UsbProtocol);
        assert_eq!(packet.packet_type(), 0x00);

        let packet = Packet::application(5, &[]).unwrap();
        assert_eq!(packet.kind(), PacketKind::Application);
        assert_eq!(packet.packet_type(), 0x14);
    }

    #[test]
    fn test_kind_wire_values() {
        assert_eq!(PacketKind::UsbProtocol.as_byte(), 0x00);
        assert_eq!(PacketKind::Application.as_byte(), 0x14);
        assert_eq!(PacketKind::from_byte(0x01), PacketKind::Unknown(0x01));
    }

    #[test]
    fn test_empty_payload() {
        let packet = Packet::application(254, &[]).unwrap();
        assert_eq!(packet.size(), 0);
        assert!(packet.payload().is_empty());
        assert_eq!(packet.wire_len(), PACKET_HEADER_SIZE);
    }

    #[test]
    fn test_max_payload_fits() {
        let data = vec![0x5a; MAX_PAYLOAD_SIZE];
        let packet = Packet::application(1, &data).unwrap();
        assert_eq!(packet.wire_len(), PACKET_CAPACITY);
        assert_eq!(packet.size() as usize, MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let data = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Packet::application(1, &data).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BufferTooSmall {
                needed: PACKET_CAPACITY + 1,
                available: PACKET_CAPACITY,
            }
        );
    }

    #[test]
    fn test_from_bytes_truncated_header() {
        let err = Packet::from_bytes(&[0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::TruncatedHeader {
                expected: 12,
                actual: 3
            }
        );
    }

    #[test]
    fn test_from_bytes_incomplete_payload() {
        let mut bytes = Packet::application(10, &[1, 2, 3, 4]).unwrap().as_bytes().to_vec();
        bytes.truncate(14);
        let err = Packet::from_bytes(&bytes).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::IncompletePacket {
                expected: 16,
                actual: 14
            }
        );
    }

    #[test]
    fn test_from_bytes_ignores_trailing_bytes() {
        let mut bytes = Packet::usb_protocol(6, &[1, 0, 0, 0]).unwrap().as_bytes().to_vec();
        bytes.extend_from_slice(&[0xee; 8]);
        let packet = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(packet.payload(), &[1, 0, 0, 0]);
        assert_eq!(packet.wire_len(), 16);
    }

    #[test]
    fn test_from_bytes_size_over_capacity() {
        let mut bytes = vec![0u8; PACKET_HEADER_SIZE];
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let packet = Packet::packetize(PacketKind::Unknown(0x42), 1, &[]).unwrap();
        assert_eq!(packet.kind(), PacketKind::Unknown(0x42));
        assert_eq!(PacketKind::from_byte(0x42).as_byte(), 0x42);
    }

    #[test]
    fn test_get_helpers() {
        let buf = [0x78, 0x56, 0x34, 0x12, 0xff, 0xff];
        assert_eq!(get_u32(&buf, 0), Some(0x1234_5678));
        assert_eq!(get_u16(&buf, 0), Some(0x5678));
        assert_eq!(get_i16(&buf, 4), Some(-1));
        assert_eq!(get_u32(&buf, 4), None);
    }
}

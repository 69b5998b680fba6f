//! Garmin USB packet protocol
//!
//! This crate frames and deframes the fixed-header packets exchanged with
//! Garmin handhelds over USB, renders them for tracing, and decodes the
//! product identification records.
//!
//! # Example
//!
//! ```
//! use protocol::{Packet, PacketKind, ids};
//!
//! let packet = Packet::usb_protocol(ids::usb::START_SESSION, &[]).unwrap();
//! assert_eq!(packet.kind(), PacketKind::UsbProtocol);
//! assert_eq!(packet.as_bytes().len(), protocol::PACKET_HEADER_SIZE);
//!
//! let decoded = Packet::from_bytes(packet.as_bytes()).unwrap();
//! assert_eq!(decoded.id(), ids::usb::START_SESSION);
//! ```

pub mod error;
pub mod ids;
pub mod packet;
pub mod product;
pub mod trace;

pub use error::{ProtocolError, Result};
pub use packet::{
    MAX_PAYLOAD_SIZE, PACKET_CAPACITY, PACKET_HEADER_SIZE, Packet, PacketKind, get_i16, get_u16,
    get_u32,
};
pub use product::{ProductData, ProductInfo, ProtocolEntry, ext_product_strings, protocol_array};
pub use trace::{Direction, format_packet, format_raw, print_packet, print_raw};

//! Packet trace rendering
//!
//! Produces the pseudo-XML trace emitted for every transfer in verbose mode:
//!
//! ```text
//! <read type="0x00" id="0x0006" size="4">
//! [0000]  78 56 34 12                                         xV4_
//! </read>
//! ```
//!
//! The layout is kept byte-for-byte stable so trace logs can be diffed
//! against captures from other tools.

use crate::packet::{PACKET_HEADER_SIZE, Packet, get_u16, get_u32};
use std::fmt::Write as _;
use std::io;

/// Bytes shown per dump row
const ROW_LEN: usize = 16;

const ID_OFFSET: usize = 6;
const SIZE_OFFSET: usize = 8;

/// Transfer direction shown in the trace tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    Unlabeled,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
            Direction::Unlabeled => "packet",
        }
    }
}

/// Render a packet trace into a string
pub fn format_packet(packet: &Packet, direction: Direction) -> String {
    render(
        packet.packet_type(),
        packet.id(),
        packet.size(),
        packet.payload(),
        direction,
    )
}

/// Render whatever bytes a transfer produced, whole packet or not
///
/// Header fields missing from a short buffer read as zero. The dump shows the
/// received payload bytes, up to the size the header declares.
pub fn format_raw(bytes: &[u8], direction: Direction) -> String {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    let head = bytes.len().min(PACKET_HEADER_SIZE);
    header[..head].copy_from_slice(&bytes[..head]);

    let size = get_u32(&header, SIZE_OFFSET).unwrap_or(0);
    let body = bytes.get(PACKET_HEADER_SIZE..).unwrap_or(&[]);
    let shown = body.len().min(size as usize);

    render(
        header[0],
        get_u16(&header, ID_OFFSET).unwrap_or(0),
        size,
        &body[..shown],
        direction,
    )
}

/// Write a packet trace to `out`
pub fn print_packet<W: io::Write>(
    out: &mut W,
    packet: &Packet,
    direction: Direction,
) -> io::Result<()> {
    out.write_all(format_packet(packet, direction).as_bytes())
}

/// Write a trace of raw transfer bytes to `out`
pub fn print_raw<W: io::Write + ?Sized>(
    out: &mut W,
    bytes: &[u8],
    direction: Direction,
) -> io::Result<()> {
    out.write_all(format_raw(bytes, direction).as_bytes())
}

fn render(packet_type: u8, id: u16, size: u32, payload: &[u8], direction: Direction) -> String {
    let tag = direction.tag();
    let mut out = String::new();

    let _ = write!(
        out,
        "<{} type=\"0x{:02x}\" id=\"0x{:04x}\" size=\"{}\"",
        tag, packet_type, id, size
    );

    if size == 0 {
        out.push_str("/>\n");
        return out;
    }

    out.push_str(">\n");
    for (row, chunk) in payload.chunks(ROW_LEN).enumerate() {
        let hex: String = chunk.iter().map(|b| format!(" {:02x}", b)).collect();
        let ascii: String = chunk.iter().map(|&b| printable(b)).collect();
        let _ = writeln!(out, "[{:04x}] {:<54} {}", row * ROW_LEN, hex, ascii);
    }
    let _ = writeln!(out, "</{}>", tag);

    out
}

fn printable(byte: u8) -> char {
    if byte.is_ascii_alphanumeric() || byte.is_ascii_punctuation() || byte == b' ' {
        byte as char
    } else {
        '_'
    }
}

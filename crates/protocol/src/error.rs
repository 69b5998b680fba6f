//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not fit in a single packet
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Received fewer bytes than a packet header
    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    /// Received fewer payload bytes than the size field declares
    #[error("Incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket { expected: usize, actual: usize },

    /// Packet carried an id other than the one being decoded
    #[error("Unexpected packet id {actual:#06x} (expected {expected:#06x})")]
    UnexpectedPacket { expected: u16, actual: u16 },

    /// Payload is too short for the record it should hold
    #[error("Payload too short for {record}: {len} bytes")]
    ShortPayload { record: &'static str, len: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

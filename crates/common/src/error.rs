//! Common error types

use thiserror::Error;

/// Why a device could not be made usable
///
/// Every variant leaves the session closed; callers may retry the open later.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("{module} kernel module is loaded; it owns the device")]
    KernelConflict { module: String },

    #[error("Failed to initialize USB context: {0}")]
    Context(rusb::Error),

    #[error("Failed to enumerate USB devices: {0}")]
    Enumerate(rusb::Error),

    #[error("No device with VID {vendor_id:04x}, PID {product_id:04x}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(rusb::Error),

    #[error("Failed to set configuration {config}: {source}")]
    ConfigurationFailed { config: u8, source: rusb::Error },

    #[error("Failed to claim interface {interface}: {source}")]
    ClaimFailed { interface: u8, source: rusb::Error },

    #[error("Failed to resolve endpoints: {0}")]
    EndpointResolutionFailed(String),
}

/// Failure of a single read or write transfer
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Device could not be opened")]
    DeviceUnavailable,

    #[error("No {0} endpoint on device")]
    MissingEndpoint(&'static str),

    #[error("Transfer timed out")]
    Timeout,

    #[error("USB I/O error: {0}")]
    Io(rusb::Error),

    /// Fewer bytes went out than the packet holds; the session is closed
    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
}

impl From<rusb::Error> for TransferError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransferError::Timeout,
            other => TransferError::Io(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Unit did not send product data")]
    MissingProductData,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! USB subsystem
//!
//! Talks to a Garmin unit over libusb:
//! - Kernel driver conflict detection
//! - Device discovery, claiming and endpoint resolution
//! - Single packet interrupt/bulk transfers
//! - Session lifecycle and the Start-Session handshake
//!
//! Everything here is synchronous and single threaded; each transfer blocks
//! for at most the fixed transfer timeout.

pub mod context;
pub mod kernel;
pub mod locator;
pub mod session;
pub mod transfers;

pub use context::UsbContextCell;
pub use locator::DeviceLocator;
pub use session::DeviceSession;

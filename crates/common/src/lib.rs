//! Common utilities for garmintools
//!
//! This crate provides what the transport and the command line share:
//! error types, endpoint classification, device identity, and logging setup.

pub mod error;
pub mod logging;
pub mod usb_types;

pub use error::{Error, OpenError, Result, TransferError};
pub use logging::setup_logging;
pub use usb_types::{DeviceIdentity, EndpointSet};

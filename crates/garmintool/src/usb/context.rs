//! Lazily created libusb context
//!
//! Owned by the application root and handed to the locator. The context is
//! created on the first open attempt and torn down when the owner drops.

use rusb::Context;
use tracing::debug;

#[derive(Default)]
pub struct UsbContextCell {
    context: Option<Context>,
}

impl UsbContextCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the context, creating it on first use
    pub fn get_or_init(&mut self) -> rusb::Result<&Context> {
        if self.context.is_none() {
            self.context = Some(Context::new()?);
            debug!("libusb context initialized");
        }
        self.context.as_ref().ok_or(rusb::Error::Other)
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }
}

impl Drop for UsbContextCell {
    fn drop(&mut self) {
        if self.context.take().is_some() {
            debug!("libusb context released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_uninitialized() {
        let cell = UsbContextCell::new();
        assert!(!cell.is_initialized());
    }
}

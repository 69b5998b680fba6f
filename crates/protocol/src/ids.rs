//! Packet identifiers used by the transport and the product query

/// USB protocol layer packet ids
pub mod usb {
    /// Device has queued data on the bulk IN endpoint
    pub const DATA_AVAILABLE: u16 = 2;
    /// Session handshake request (host to device)
    pub const START_SESSION: u16 = 5;
    /// Session handshake reply carrying the unit id
    pub const SESSION_STARTED: u16 = 6;
}

/// Application layer packet ids (link protocol L000)
pub mod app {
    /// Protocol capability array
    pub const PROTOCOL_ARRAY: u16 = 253;
    /// Product data request
    pub const PRODUCT_REQUEST: u16 = 254;
    /// Product data reply
    pub const PRODUCT_DATA: u16 = 255;
    /// Extended product data (additional strings)
    pub const EXT_PRODUCT_DATA: u16 = 248;
}

/// USB vendor id assigned to Garmin
pub const GARMIN_USB_VID: u16 = 0x091e;

/// USB product id shared by Garmin handhelds speaking this protocol
pub const GARMIN_USB_PID: u16 = 0x0003;

//! Device session
//!
//! Owns the claimed device for its lifetime, opens it lazily on the first
//! transfer, and runs the Start-Session handshake that yields the unit id.
//!
//! ```text
//! Closed --open--> Claimed --start_session--> Active(device_id) --close--> Closed
//! ```
//!
//! A failed open leaves the session `Closed`. A handshake without a proper
//! reply still moves to `Active`, with `device_id == 0`.

use crate::usb::locator::DeviceOpener;
use crate::usb::transfers::{UsbLink, read_packet, write_packet};
use common::{EndpointSet, Error, Result, TransferError};
use protocol::ids::{app, usb};
use protocol::{
    Direction, PACKET_HEADER_SIZE, Packet, PacketKind, ProductData, ProductInfo,
    ext_product_strings, get_u32, print_packet, print_raw, protocol_array,
};
use std::io;
use tracing::{debug, info, warn};

/// The unit may drop early handshake writes while it arms its USB stack
const START_SESSION_WRITES: usize = 3;

/// Header plus a 4-byte unit id
const SESSION_REPLY_LEN: usize = PACKET_HEADER_SIZE + 4;

/// Upper bound on packets consumed while waiting for the protocol array
const MAX_PRODUCT_PACKETS: usize = 32;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Claimed,
    Active { device_id: u32 },
}

/// Destination of packet traces
pub type TraceSink = Box<dyn io::Write>;

pub struct DeviceSession<O: DeviceOpener> {
    opener: O,
    link: Option<O::Link>,
    endpoints: EndpointSet,
    read_bulk: bool,
    device_id: u32,
    handshaken: bool,
    trace: Option<TraceSink>,
}

impl<O: DeviceOpener> DeviceSession<O> {
    /// Create a closed session
    ///
    /// With a `trace` sink every packet read or written is dumped to it.
    pub fn new(opener: O, trace: Option<TraceSink>) -> Self {
        Self {
            opener,
            link: None,
            endpoints: EndpointSet::default(),
            read_bulk: false,
            device_id: 0,
            handshaken: false,
            trace,
        }
    }

    /// Open the device if not already open
    ///
    /// Returns whether the device is open afterwards.
    pub fn open(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }

        match self.opener.find_and_claim() {
            Some((link, endpoints)) => {
                self.link = Some(link);
                self.endpoints = endpoints;
                info!("Session opened");
                true
            }
            None => false,
        }
    }

    /// Release the interface and close the device; no-op when closed
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.release();
            self.endpoints = EndpointSet::default();
            self.device_id = 0;
            self.handshaken = false;
            info!("Session closed");
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.link, self.handshaken) {
            (None, _) => SessionState::Closed,
            (Some(_), false) => SessionState::Claimed,
            (Some(_), true) => SessionState::Active {
                device_id: self.device_id,
            },
        }
    }

    /// Unit id from the last handshake; 0 when unidentified
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn endpoints(&self) -> EndpointSet {
        self.endpoints
    }

    /// Read from bulk IN instead of interrupt IN
    pub fn set_read_bulk(&mut self, read_bulk: bool) {
        self.read_bulk = read_bulk;
    }

    pub fn read_bulk(&self) -> bool {
        self.read_bulk
    }

    /// Read one packet worth of raw bytes
    pub fn read(&mut self) -> std::result::Result<Vec<u8>, TransferError> {
        if !self.open() {
            return Err(TransferError::DeviceUnavailable);
        }
        let link = self.link.as_ref().ok_or(TransferError::DeviceUnavailable)?;

        let bytes = match read_packet(link, &self.endpoints, self.read_bulk) {
            Ok(bytes) => bytes,
            Err(e) => {
                if self.trace.is_some() {
                    warn!("Read failed: {}", e);
                }
                return Err(e);
            }
        };

        if let Some(out) = self.trace.as_mut()
            && let Err(e) = print_raw(out, &bytes, Direction::Read)
        {
            debug!("Failed to write packet trace: {}", e);
        }

        if signals_data_available(&bytes, self.read_bulk) {
            // The drain protocol is unspecified; the queued data is left on bulk IN.
            info!("Unit reported queued bulk data; not drained");
        }

        Ok(bytes)
    }

    /// Write a packet
    ///
    /// Any failure, including a short write, closes the session before the
    /// error is returned.
    pub fn write(&mut self, packet: &Packet) -> std::result::Result<usize, TransferError> {
        if !self.open() {
            return Err(TransferError::DeviceUnavailable);
        }
        if let Some(out) = self.trace.as_mut()
            && let Err(e) = print_packet(out, packet, Direction::Write)
        {
            debug!("Failed to write packet trace: {}", e);
        }
        let link = self.link.as_ref().ok_or(TransferError::DeviceUnavailable)?;

        match write_packet(link, &self.endpoints, packet) {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!("Write failed, closing session: {}", e);
                self.close();
                Err(e)
            }
        }
    }

    /// Run the Start-Session handshake and return the unit id
    ///
    /// Only a failed write is an error. A missing or malformed reply yields
    /// id 0, which callers must treat as an unidentified session.
    pub fn start_session(&mut self) -> Result<u32> {
        let packet = Packet::usb_protocol(usb::START_SESSION, &[])?;

        for _ in 0..START_SESSION_WRITES {
            self.write(&packet)?;
        }

        self.device_id = match self.read() {
            Ok(bytes) if bytes.len() == SESSION_REPLY_LEN => {
                get_u32(&bytes, PACKET_HEADER_SIZE).unwrap_or(0)
            }
            Ok(bytes) => {
                warn!("Session reply of {} bytes ignored", bytes.len());
                0
            }
            Err(e) => {
                warn!("No session reply: {}", e);
                0
            }
        };
        self.handshaken = true;

        if self.device_id == 0 {
            warn!("Session started without a unit id");
        } else {
            info!("Session started with unit {}", self.device_id);
        }
        Ok(self.device_id)
    }

    /// Ask the unit for its product data and protocol capabilities
    pub fn product_info(&mut self) -> Result<ProductInfo> {
        let request = Packet::application(app::PRODUCT_REQUEST, &[])?;
        self.write(&request)?;

        let mut product = None;
        let mut ext_strings = Vec::new();
        let mut protocols = Vec::new();

        for _ in 0..MAX_PRODUCT_PACKETS {
            let bytes = match self.read() {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Product query ended: {}", e);
                    break;
                }
            };
            let Ok(packet) = Packet::from_bytes(&bytes) else {
                continue;
            };
            if packet.kind() != PacketKind::Application {
                continue;
            }

            match packet.id() {
                app::PRODUCT_DATA => product = Some(ProductData::from_packet(&packet)?),
                app::EXT_PRODUCT_DATA => ext_strings.extend(ext_product_strings(&packet)?),
                app::PROTOCOL_ARRAY => {
                    protocols = protocol_array(&packet)?;
                    break;
                }
                other => debug!("Ignoring packet {:#06x} during product query", other),
            }
        }

        let product = product.ok_or(Error::MissingProductData)?;
        Ok(ProductInfo {
            product,
            ext_strings,
            protocols,
        })
    }
}

/// Whether an interrupt read carried the Data-Available notice
///
/// The notice only arrives on the interrupt pipe; bulk reads are not checked.
fn signals_data_available(bytes: &[u8], bulk: bool) -> bool {
    !bulk
        && Packet::from_bytes(bytes)
            .is_ok_and(|packet| packet.is(PacketKind::UsbProtocol, usb::DATA_AVAILABLE))
}

impl<O: DeviceOpener> Drop for DeviceSession<O> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    /// Shared view of everything the fake device saw
    #[derive(Default)]
    struct DeviceLog {
        writes: Vec<Vec<u8>>,
        reads: VecDeque<rusb::Result<Vec<u8>>>,
        short_write: Option<usize>,
        released: usize,
        opens: usize,
    }

    struct MockLink {
        log: Rc<RefCell<DeviceLog>>,
    }

    impl MockLink {
        fn next_read(&self, buf: &mut [u8]) -> rusb::Result<usize> {
            let reply = self
                .log
                .borrow_mut()
                .reads
                .pop_front()
                .unwrap_or(Err(rusb::Error::Timeout))?;
            buf[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    impl UsbLink for MockLink {
        fn read_interrupt(&self, _: u8, buf: &mut [u8], _: Duration) -> rusb::Result<usize> {
            self.next_read(buf)
        }

        fn read_bulk(&self, _: u8, buf: &mut [u8], _: Duration) -> rusb::Result<usize> {
            self.next_read(buf)
        }

        fn write_bulk(&self, _: u8, buf: &[u8], _: Duration) -> rusb::Result<usize> {
            let mut log = self.log.borrow_mut();
            log.writes.push(buf.to_vec());
            Ok(log.short_write.unwrap_or(buf.len()))
        }

        fn release(&mut self) {
            self.log.borrow_mut().released += 1;
        }
    }

    struct MockOpener {
        log: Rc<RefCell<DeviceLog>>,
        available: bool,
    }

    impl DeviceOpener for MockOpener {
        type Link = MockLink;

        fn find_and_claim(&mut self) -> Option<(MockLink, EndpointSet)> {
            self.log.borrow_mut().opens += 1;
            if !self.available {
                return None;
            }
            Some((
                MockLink {
                    log: Rc::clone(&self.log),
                },
                EndpointSet {
                    bulk_in: Some(0x82),
                    bulk_out: Some(0x02),
                    interrupt_in: Some(0x83),
                },
            ))
        }
    }

    fn session(log: &Rc<RefCell<DeviceLog>>) -> DeviceSession<MockOpener> {
        DeviceSession::new(
            MockOpener {
                log: Rc::clone(log),
                available: true,
            },
            None,
        )
    }

    /// Trace sink the test can read back after the session wrote to it
    #[derive(Clone, Default)]
    struct SharedTrace(Rc<RefCell<Vec<u8>>>);

    impl SharedTrace {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl io::Write for SharedTrace {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn traced_session(log: &Rc<RefCell<DeviceLog>>) -> (DeviceSession<MockOpener>, SharedTrace) {
        let trace = SharedTrace::default();
        let session = DeviceSession::new(
            MockOpener {
                log: Rc::clone(log),
                available: true,
            },
            Some(Box::new(trace.clone())),
        );
        (session, trace)
    }

    fn session_started(unit_id: u32) -> Vec<u8> {
        Packet::usb_protocol(usb::SESSION_STARTED, &unit_id.to_le_bytes())
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    fn app_packet(id: u16, data: &[u8]) -> Vec<u8> {
        Packet::application(id, data).unwrap().as_bytes().to_vec()
    }

    #[test]
    fn test_starts_closed() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let session = session(&log);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.device_id(), 0);
        assert_eq!(log.borrow().opens, 0);
    }

    #[test]
    fn test_open_is_idempotent() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let mut session = session(&log);

        assert!(session.open());
        assert!(session.open());
        assert_eq!(log.borrow().opens, 1);
        assert_eq!(session.state(), SessionState::Claimed);
        assert_eq!(session.endpoints().bulk_out, Some(0x02));
    }

    #[test]
    fn test_handshake_writes_three_times() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        log.borrow_mut().reads.push_back(Ok(session_started(0x1234_5678)));
        let mut session = session(&log);

        let id = session.start_session().unwrap();

        assert_eq!(id, 0x1234_5678);
        assert_eq!(
            session.state(),
            SessionState::Active {
                device_id: 0x1234_5678
            }
        );
        let log = log.borrow();
        assert_eq!(log.writes.len(), 3);
        for write in &log.writes {
            assert_eq!(write, &[0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_handshake_short_reply_is_unidentified() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let reply = Packet::usb_protocol(usb::SESSION_STARTED, &[1, 2]).unwrap();
        log.borrow_mut().reads.push_back(Ok(reply.as_bytes().to_vec()));
        let mut session = session(&log);

        assert_eq!(session.start_session().unwrap(), 0);
        assert_eq!(session.state(), SessionState::Active { device_id: 0 });
    }

    #[test]
    fn test_handshake_timeout_is_unidentified() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let mut session = session(&log);

        assert_eq!(session.start_session().unwrap(), 0);
        assert_eq!(session.device_id(), 0);
        assert_ne!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_short_write_closes_session() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        log.borrow_mut().short_write = Some(6);
        let mut session = session(&log);

        let err = session.start_session().unwrap_err();

        assert!(matches!(
            err,
            Error::Transfer(TransferError::ShortWrite {
                expected: 12,
                actual: 6
            })
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.borrow().writes.len(), 1);
        assert_eq!(log.borrow().released, 1);
    }

    #[test]
    fn test_unavailable_device() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let mut session = DeviceSession::new(
            MockOpener {
                log: Rc::clone(&log),
                available: false,
            },
            None,
        );

        assert!(matches!(session.read(), Err(TransferError::DeviceUnavailable)));
        let packet = Packet::application(app::PRODUCT_REQUEST, &[]).unwrap();
        assert!(matches!(
            session.write(&packet),
            Err(TransferError::DeviceUnavailable)
        ));
        // every operation retries the open
        assert_eq!(log.borrow().opens, 2);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_lazy_reopen_after_close() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        log.borrow_mut().reads.push_back(Ok(vec![0; 12]));
        let mut session = session(&log);

        assert!(session.open());
        session.close();
        session.close();
        assert_eq!(log.borrow().released, 1);

        assert_eq!(session.read().unwrap().len(), 12);
        assert_eq!(log.borrow().opens, 2);
    }

    #[test]
    fn test_data_available_is_returned_unchanged() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let notice = Packet::usb_protocol(usb::DATA_AVAILABLE, &[])
            .unwrap()
            .as_bytes()
            .to_vec();
        log.borrow_mut().reads.push_back(Ok(notice.clone()));
        let mut session = session(&log);

        assert_eq!(session.read().unwrap(), notice);
        assert!(log.borrow().reads.is_empty());
    }

    #[test]
    fn test_product_info() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        {
            let mut product = Vec::new();
            product.extend_from_slice(&484u16.to_le_bytes());
            product.extend_from_slice(&250i16.to_le_bytes());
            product.extend_from_slice(b"Forerunner305\0");

            let mut log = log.borrow_mut();
            log.reads.push_back(Ok(app_packet(app::PRODUCT_DATA, &product)));
            log.reads.push_back(Ok(app_packet(app::EXT_PRODUCT_DATA, b"SQA\0")));
            log.reads.push_back(Ok(app_packet(0x0010, &[])));
            log.reads.push_back(Ok(app_packet(
                app::PROTOCOL_ARRAY,
                &[b'L', 1, 0, b'A', 10, 0],
            )));
        }
        let mut session = session(&log);

        let info = session.product_info().unwrap();

        assert_eq!(info.product.product_id, 484);
        assert_eq!(info.product.description, "Forerunner305");
        assert_eq!(info.ext_strings, vec!["SQA".to_string()]);
        assert_eq!(info.protocols.len(), 2);
        assert_eq!(log.borrow().writes[0], app_packet(app::PRODUCT_REQUEST, &[]));
    }

    #[test]
    fn test_product_info_without_product_data() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let mut session = session(&log);

        assert!(matches!(
            session.product_info(),
            Err(Error::MissingProductData)
        ));
    }

    #[test]
    fn test_drop_closes() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        {
            let mut session = session(&log);
            session.open();
        }
        assert_eq!(log.borrow().released, 1);
    }

    #[test]
    fn test_trace_full_read() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        log.borrow_mut().reads.push_back(Ok(session_started(0x1234_5678)));
        let (mut session, trace) = traced_session(&log);

        session.read().unwrap();

        assert_eq!(
            trace.text(),
            format!(
                "<read type=\"0x00\" id=\"0x0006\" size=\"4\">\n[0000] {:<54} xV4_\n</read>\n",
                " 78 56 34 12"
            )
        );
    }

    #[test]
    fn test_trace_short_read() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let mut reply = session_started(0x1234_5678);
        reply.truncate(8);
        log.borrow_mut().reads.push_back(Ok(reply));
        let (mut session, trace) = traced_session(&log);

        assert_eq!(session.read().unwrap().len(), 8);
        assert_eq!(trace.text(), "<read type=\"0x00\" id=\"0x0006\" size=\"0\"/>\n");
    }

    #[test]
    fn test_trace_write() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let (mut session, trace) = traced_session(&log);

        let packet = Packet::application(app::PRODUCT_REQUEST, &[]).unwrap();
        session.write(&packet).unwrap();

        assert_eq!(trace.text(), "<write type=\"0x14\" id=\"0x00fe\" size=\"0\"/>\n");
    }

    #[test]
    fn test_trace_failed_read_prints_nothing() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        let (mut session, trace) = traced_session(&log);

        assert!(matches!(session.read(), Err(TransferError::Timeout)));
        assert!(trace.text().is_empty());
    }

    #[test]
    fn test_no_trace_sink_is_silent() {
        let log = Rc::new(RefCell::new(DeviceLog::default()));
        log.borrow_mut().reads.push_back(Ok(session_started(7)));
        let mut session = session(&log);

        assert_eq!(session.start_session().unwrap(), 7);
        assert!(session.trace.is_none());
    }

    #[test]
    fn test_data_available_only_on_interrupt_reads() {
        let notice = Packet::usb_protocol(usb::DATA_AVAILABLE, &[]).unwrap();
        let app = Packet::application(usb::DATA_AVAILABLE, &[]).unwrap();

        assert!(signals_data_available(notice.as_bytes(), false));
        assert!(!signals_data_available(notice.as_bytes(), true));
        assert!(!signals_data_available(app.as_bytes(), false));
        assert!(!signals_data_available(&notice.as_bytes()[..6], false));
    }
}

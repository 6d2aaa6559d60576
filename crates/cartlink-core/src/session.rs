//! Session - one open reader: device handle, claimed interface, endpoints.
//!
//! The four resources are grouped in a single record that is created whole
//! after a successful connect and replaced whole on disconnect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::device::{DeviceDescriptor, DeviceType};
use crate::events::{CartEvent, CartObserver, PacketDirection};
use crate::protocol::CommandChannel;
use crate::protocol::constants::LINE_END;
use crate::transport::{TransportError, UsbDeviceHandle, UsbTransport};

/// Connection lifecycle. Any failure returns to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Opening,
    InterfaceClaimed,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Opening => write!(f, "Opening"),
            ConnectionState::InterfaceClaimed => write!(f, "Interface Claimed"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// An identified, exclusively owned reader connection.
pub struct Session {
    handle: Box<dyn UsbDeviceHandle>,
    transport: Arc<dyn UsbTransport>,
    interface: u8,
    descriptor: &'static DeviceDescriptor,
    device_type: DeviceType,
    identification: String,
    response_buffer: usize,
    /// Serializes command/response exchanges on the endpoint pair.
    io_lock: Mutex<()>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        handle: Box<dyn UsbDeviceHandle>,
        transport: Arc<dyn UsbTransport>,
        interface: u8,
        descriptor: &'static DeviceDescriptor,
        device_type: DeviceType,
        identification: String,
        response_buffer: usize,
    ) -> Self {
        Self {
            handle,
            transport,
            interface,
            descriptor,
            device_type,
            identification,
            response_buffer,
            io_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn descriptor(&self) -> &'static DeviceDescriptor {
        self.descriptor
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    /// Raw identification response.
    pub fn identification(&self) -> &str {
        &self.identification
    }

    /// Open, and the device has not reported itself gone.
    pub fn is_live(&self) -> bool {
        !self.is_closed() && self.transport.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` with exclusive use of the command channel.
    ///
    /// Fails with `Disconnected` once the session has been closed.
    pub fn exchange<R>(
        &self,
        f: impl FnOnce(&CommandChannel<'_>) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        let channel = CommandChannel::new(self.transport.as_ref(), self.response_buffer);
        f(&channel)
    }

    /// Release the interface and close the handle. Errors are logged only.
    ///
    /// Waits for an exchange in progress to finish first.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        release_resources(Some(self.handle.as_ref()), Some(&self.transport));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Best-effort release of partially or fully acquired resources.
pub(crate) fn release_resources(
    handle: Option<&dyn UsbDeviceHandle>,
    transport: Option<&Arc<dyn UsbTransport>>,
) {
    if let Some(transport) = transport
        && let Err(e) = transport.release()
    {
        warn!(error = %e, "Interface release failed, ignoring");
    }
    if let Some(handle) = handle
        && let Err(e) = handle.close()
    {
        warn!(error = %e, "Device close failed, ignoring");
    }
    debug!("Session resources released");
}

/// Transport wrapper that emits packet and command events.
pub(crate) struct ObservableTransport<O: CartObserver + ?Sized> {
    pub(crate) inner: Arc<dyn UsbTransport>,
    pub(crate) observer: Arc<O>,
}

impl<O: CartObserver + ?Sized> UsbTransport for ObservableTransport<O> {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.write(data);
        if res.is_ok() {
            if data.len() < 64 && data.last() == Some(&LINE_END) && data.is_ascii() {
                self.observer.on_event(&CartEvent::CommandSent {
                    command: String::from_utf8_lossy(&data[..data.len() - 1]).into_owned(),
                });
            }
            self.observer.on_event(&CartEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.observer.on_event(&CartEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    fn control_out(&self, request: u8, value: u16, index: u16) -> Result<(), TransportError> {
        self.inner.control_out(request, value, index)
    }

    fn release(&self) -> Result<(), TransportError> {
        self.inner.release()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::lookup;
    use crate::transport::{MockHost, MockTransport, UsbHost};

    fn open_session(host: &Arc<MockHost>) -> Session {
        let candidate = crate::device::find_device(host).unwrap();
        let handle = host.open(&candidate.info).unwrap();
        let transport = handle.claim_interface(0).unwrap();
        Session::new(
            handle,
            transport,
            0,
            lookup(0x1A86, 0x7523).unwrap(),
            DeviceType::GbxCart,
            "GBxCart".to_string(),
            512,
        )
    }

    #[test]
    fn test_close_is_idempotent() {
        let host = Arc::new(MockHost::with_device(0x1A86, 0x7523, MockTransport::new()));
        let session = open_session(&host);
        assert!(session.is_live());

        session.close();
        session.close();
        assert!(!session.is_live());
        assert!(host.transport().is_released());
        assert_eq!(host.close_count(), 1);

        drop(session);
        assert_eq!(host.close_count(), 1);
    }

    #[test]
    fn test_exchange_after_close() {
        let host = Arc::new(MockHost::with_device(0x1A86, 0x7523, MockTransport::new()));
        let session = open_session(&host);
        session.close();

        let result = session.exchange(|channel| Ok(channel.send_command("INFO")));
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert!(host.transport().get_writes().is_empty());
    }

    #[test]
    fn test_device_gone_is_not_live() {
        let host = Arc::new(MockHost::with_device(0x1A86, 0x7523, MockTransport::new()));
        let session = open_session(&host);
        host.transport().disconnect();
        assert!(!session.is_live());
        assert!(!session.is_closed());
    }

    #[test]
    fn test_observable_transport_events() {
        struct Counter(Mutex<Vec<String>>);
        impl CartObserver for Counter {
            fn on_event(&self, event: &CartEvent) {
                if let CartEvent::CommandSent { command } = event {
                    self.0.lock().unwrap().push(command.clone());
                }
            }
        }

        let mock: Arc<dyn UsbTransport> = Arc::new(MockTransport::new());
        let observer = Arc::new(Counter(Mutex::new(Vec::new())));
        let wrapped = ObservableTransport {
            inner: mock,
            observer: observer.clone(),
        };
        wrapped.write(b"INFO\n").unwrap();
        wrapped.write(&[0u8; 128]).unwrap();
        assert_eq!(*observer.0.lock().unwrap(), vec!["INFO".to_string()]);
    }
}

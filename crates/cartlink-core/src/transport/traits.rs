//! USB Transport layer abstraction.
//!
//! Three seams separate the engine from the platform USB stack:
//! - `UsbHost`: enumeration, the permission oracle, and opening devices
//! - `UsbDeviceHandle`: an opened device whose interface can be claimed
//! - `UsbTransport`: a claimed interface with one bulk IN / bulk OUT pair
//!
//! The production implementation uses nusb; the mock drives unit tests.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Control transfer failed: {0}")]
    ControlFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the device itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

/// Abstract USB transport over a claimed interface.
///
/// Implementations apply their configured timeout to every transfer.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the bulk OUT endpoint.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max_len` raw bytes from the bulk IN endpoint.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Read exactly `len` bytes, issuing as many bulk reads as needed.
    fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::with_capacity(len);
        while buf.len() < len {
            let part = self.read(len - buf.len())?;
            if part.is_empty() {
                return Err(TransportError::ReadFailed(format!(
                    "Short read: {} of {} bytes",
                    buf.len(),
                    len
                )));
            }
            buf.extend_from_slice(&part);
        }
        Ok(buf)
    }

    /// Vendor OUT control request without a data stage.
    fn control_out(&self, request: u8, value: u16, index: u16) -> Result<(), TransportError>;

    /// Release the claimed interface. Further I/O reports `Disconnected`.
    fn release(&self) -> Result<(), TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

/// Interface descriptor summary used for interface selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbInterfaceInfo {
    pub number: u8,
    pub class: u8,
}

/// One attached USB device as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Platform bus identifier.
    pub bus_id: String,
    /// Device address on the bus.
    pub address: u8,
    /// Product string descriptor, when the platform caches it.
    pub product: Option<String>,
    pub interfaces: Vec<UsbInterfaceInfo>,
}

/// An opened device, before any interface has been claimed.
pub trait UsbDeviceHandle: Send + Sync {
    /// Claim `interface` and resolve its bulk endpoint pair.
    fn claim_interface(&self, interface: u8) -> Result<Arc<dyn UsbTransport>, TransportError>;

    /// Close the device handle.
    fn close(&self) -> Result<(), TransportError>;
}

/// Platform USB host: enumeration, permission oracle, open.
pub trait UsbHost: Send + Sync {
    /// List currently attached devices. An empty list is not an error.
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError>;

    /// Whether the device can be opened without further prompting.
    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Open the device.
    fn open(&self, device: &UsbDeviceInfo) -> Result<Box<dyn UsbDeviceHandle>, TransportError>;
}

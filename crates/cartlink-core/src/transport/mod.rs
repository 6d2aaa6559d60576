//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockCartridge, MockHost, MockTransport};
pub use nusb::{NusbHost, NusbTransport};
pub use traits::{
    TransportError, UsbDeviceHandle, UsbDeviceInfo, UsbHost, UsbInterfaceInfo, UsbTransport,
};

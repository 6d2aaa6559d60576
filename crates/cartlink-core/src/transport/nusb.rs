//! nusb-based USB transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nusb::io::{EndpointRead, EndpointWrite};
use nusb::transfer::{Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{
    TransportError, UsbDeviceHandle, UsbDeviceInfo, UsbHost, UsbInterfaceInfo, UsbTransport,
};

/// Size of each queued bulk transfer behind the endpoint reader/writer.
const TRANSFER_BUFFER: usize = 16 * 1024;

/// Host backed by the platform USB stack through nusb.
#[derive(Debug, Clone)]
pub struct NusbHost {
    timeout: Duration,
}

impl NusbHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn find_device_info(&self, device: &UsbDeviceInfo) -> Result<nusb::DeviceInfo, TransportError> {
        list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| {
                d.vendor_id() == device.vendor_id
                    && d.product_id() == device.product_id
                    && d.bus_id() == device.bus_id
                    && d.device_address() == device.address
            })
            .ok_or(TransportError::DeviceNotFound {
                vid: device.vendor_id,
                pid: device.product_id,
            })
    }
}

impl UsbHost for NusbHost {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(devices
            .map(|d| UsbDeviceInfo {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                bus_id: d.bus_id().to_string(),
                address: d.device_address(),
                product: d.product_string().map(str::to_owned),
                interfaces: d
                    .interfaces()
                    .map(|i| UsbInterfaceInfo {
                        number: i.interface_number(),
                        class: i.class(),
                    })
                    .collect(),
            })
            .collect())
    }

    #[cfg(target_os = "linux")]
    fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        // usbfs node: /dev/bus/usb/BBB/DDD
        let Ok(bus) = device.bus_id.parse::<u8>() else {
            return true;
        };
        let node = format!("/dev/bus/usb/{:03}/{:03}", bus, device.address);
        match std::fs::OpenOptions::new().read(true).write(true).open(&node) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => false,
            // Node layout differs (e.g. containers); let open report the real error.
            Err(_) => true,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        true
    }

    #[instrument(skip(self, device), fields(vid = %format!("{:04X}", device.vendor_id), pid = %format!("{:04X}", device.product_id)))]
    fn open(&self, device: &UsbDeviceInfo) -> Result<Box<dyn UsbDeviceHandle>, TransportError> {
        let device_info = self.find_device_info(device)?;

        let opened = device_info.open().wait().map_err(|e| {
            let e = std::io::Error::from(e);
            if e.kind() == ErrorKind::PermissionDenied {
                TransportError::PermissionDenied(e.to_string())
            } else {
                TransportError::OpenFailed(e.to_string())
            }
        })?;

        info!("Device opened");
        Ok(Box::new(NusbDeviceHandle {
            device: opened,
            timeout: self.timeout,
            vid: device.vendor_id,
            pid: device.product_id,
        }))
    }
}

/// Opened nusb device.
pub struct NusbDeviceHandle {
    device: Device,
    timeout: Duration,
    vid: u16,
    pid: u16,
}

impl NusbDeviceHandle {
    fn find_bulk_endpoints(&self, interface: u8) -> (u8, u8) {
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in self.device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == interface {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        (in_endpoint, out_endpoint)
    }
}

impl UsbDeviceHandle for NusbDeviceHandle {
    #[instrument(skip(self))]
    fn claim_interface(&self, interface: u8) -> Result<Arc<dyn UsbTransport>, TransportError> {
        let (in_endpoint, out_endpoint) = self.find_bulk_endpoints(interface);

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        // Serial adapters usually have a kernel driver bound.
        let claimed = self
            .device
            .detach_and_claim_interface(interface)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            })?;

        let reader = claimed
            .endpoint::<Bulk, In>(in_endpoint)
            .map_err(|e| TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: format!("In (0x{:02X}: {})", in_endpoint, e),
            })?
            .reader(TRANSFER_BUFFER)
            .with_read_timeout(self.timeout);
        let writer = claimed
            .endpoint::<Bulk, Out>(out_endpoint)
            .map_err(|e| TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: format!("Out (0x{:02X}: {})", out_endpoint, e),
            })?
            .writer(TRANSFER_BUFFER)
            .with_write_timeout(self.timeout);

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Interface claimed"
        );

        Ok(Arc::new(NusbTransport {
            interface: claimed,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            vid: self.vid,
            pid: self.pid,
            timeout: self.timeout,
            connected: AtomicBool::new(true),
        }))
    }

    fn close(&self) -> Result<(), TransportError> {
        // nusb closes the device when the last handle drops.
        debug!("Device handle closed");
        Ok(())
    }
}

/// nusb-based USB transport over a claimed interface.
pub struct NusbTransport {
    interface: Interface,
    reader: Mutex<EndpointRead<Bulk>>,
    writer: Mutex<EndpointWrite<Bulk>>,
    vid: u16,
    pid: u16,
    timeout: Duration,
    connected: AtomicBool,
}

impl NusbTransport {
    fn map_io(&self, e: std::io::Error, wrap: fn(String) -> TransportError) -> TransportError {
        match e.kind() {
            ErrorKind::TimedOut => TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
            ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => {
                warn!(error = %e, "Device gone");
                self.connected.store(false, Ordering::SeqCst);
                TransportError::Disconnected
            }
            _ => wrap(e.to_string()),
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_connected()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::WriteFailed("writer lock poisoned".into()))?;

        writer
            .write_all(data)
            .map_err(|e| self.map_io(e, TransportError::WriteFailed))?;
        writer
            .flush()
            .map_err(|e| self.map_io(e, TransportError::WriteFailed))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self))]
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| TransportError::ReadFailed("reader lock poisoned".into()))?;

        let mut buf = vec![0u8; max_len];
        let n = reader
            .read(&mut buf)
            .map_err(|e| self.map_io(e, TransportError::ReadFailed))?;

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    #[instrument(skip(self))]
    fn control_out(&self, request: u8, value: u16, index: u16) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data: &[],
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| TransportError::ControlFailed(e.to_string()))
    }

    fn release(&self) -> Result<(), TransportError> {
        // The interface itself is released when the last reference drops.
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

//! Device discovery: match attached USB devices against the registry.

use tracing::{debug, warn};

use super::registry::{DeviceDescriptor, lookup};
use crate::transport::{UsbDeviceInfo, UsbHost};

/// USB interface class for CDC data (serial payload).
pub const CLASS_CDC_DATA: u8 = 0x0A;
/// USB interface class for vendor-specific interfaces.
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// An attached device that matches a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub info: UsbDeviceInfo,
    pub descriptor: &'static DeviceDescriptor,
}

/// Every attached device that matches the registry, in enumeration order.
pub fn scan<H: UsbHost + ?Sized>(host: &H) -> Vec<DeviceCandidate> {
    let devices = match host.devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "USB enumeration failed");
            return Vec::new();
        }
    };

    devices
        .into_iter()
        .filter_map(|info| {
            let descriptor = lookup(info.vendor_id, info.product_id)?;
            debug!(device = %descriptor, bus = %info.bus_id, address = info.address, "Matched reader");
            Some(DeviceCandidate { info, descriptor })
        })
        .collect()
}

/// First attached device that matches the registry, if any.
pub fn find_device<H: UsbHost + ?Sized>(host: &H) -> Option<DeviceCandidate> {
    scan(host).into_iter().next()
}

/// Whether the device may be opened without prompting.
///
/// Only checks; obtaining permission is the host application's job.
pub fn has_permission<H: UsbHost + ?Sized>(host: &H, candidate: &DeviceCandidate) -> bool {
    host.has_permission(&candidate.info)
}

/// First serial-class or vendor-specific interface on the device.
pub fn select_interface(info: &UsbDeviceInfo) -> Option<u8> {
    info.interfaces
        .iter()
        .find(|i| i.class == CLASS_CDC_DATA || i.class == CLASS_VENDOR_SPECIFIC)
        .map(|i| i.number)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::{MockHost, UsbInterfaceInfo};

    #[test]
    fn test_empty_scan() {
        let host = Arc::new(MockHost::empty());
        assert!(scan(&host).is_empty());
        assert!(find_device(&host).is_none());
    }

    #[test]
    fn test_find_first_match() {
        let host = Arc::new(MockHost::empty());
        host.attach(MockHost::device_info(0x046D, 0xC52B, 0x03));
        host.attach(MockHost::device_info(0x0483, 0x5740, 0x0A));
        host.attach(MockHost::device_info(0x1A86, 0x7523, 0xFF));

        let found = find_device(&host).unwrap();
        assert_eq!(found.descriptor.family, "Joey Jr");
        assert_eq!(scan(&host).len(), 2);
    }

    #[test]
    fn test_permission_oracle() {
        let host = Arc::new(MockHost::with_device(
            0x1A86,
            0x7523,
            crate::transport::MockTransport::new(),
        ));
        let candidate = find_device(&host).unwrap();
        assert!(has_permission(&host, &candidate));
        host.set_permission(false);
        assert!(!has_permission(&host, &candidate));
    }

    #[test]
    fn test_select_interface() {
        let mut info = MockHost::device_info(0x0483, 0x5740, 0x02);
        assert_eq!(select_interface(&info), None);

        info.interfaces.push(UsbInterfaceInfo {
            number: 1,
            class: CLASS_CDC_DATA,
        });
        assert_eq!(select_interface(&info), Some(1));

        info.interfaces.insert(
            0,
            UsbInterfaceInfo {
                number: 3,
                class: CLASS_VENDOR_SPECIFIC,
            },
        );
        assert_eq!(select_interface(&info), Some(3));
    }
}

//! Mock USB host and transport for testing.
//!
//! `MockTransport` keeps a response queue and a write log. With a
//! `MockCartridge` attached it also answers the reader's line protocol,
//! serving ROM / save bytes and applying save writes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::traits::{
    TransportError, UsbDeviceHandle, UsbDeviceInfo, UsbHost, UsbInterfaceInfo, UsbTransport,
};
use crate::protocol::constants::*;

/// Emulated reader plus inserted cartridge.
#[derive(Debug, Clone, Default)]
pub struct MockCartridge {
    /// Text returned for `RESET`.
    pub identity: String,
    /// Text returned for `INFO`. Built from `rom` / `save` when `None`.
    pub info: Option<String>,
    pub rom: Vec<u8>,
    pub save: Option<Vec<u8>>,
}

impl MockCartridge {
    /// Reader identifying as `identity` with the given ROM and save memory.
    pub fn new(identity: &str, rom: Vec<u8>, save: Option<Vec<u8>>) -> Self {
        Self {
            identity: identity.to_string(),
            info: None,
            rom,
            save,
        }
    }

    fn info_text(&self) -> String {
        if let Some(info) = &self.info {
            return info.clone();
        }
        if self.rom.is_empty() {
            return RESP_NO_CART.to_string();
        }
        let save = match &self.save {
            Some(save) if !save.is_empty() => save.len().to_string(),
            _ => INFO_SAVE_NONE.to_string(),
        };
        format!("{}={} {}={}", INFO_KEY_ROM, self.rom.len(), INFO_KEY_SAVE, save)
    }
}

/// Pending `WRITE SAVE` payload.
#[derive(Debug)]
struct PendingWrite {
    offset: usize,
    remaining: usize,
}

/// Mock transport for unit testing engine logic.
pub struct MockTransport {
    /// Queued responses returned on read.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Captured control requests (request, value, index).
    control_log: Arc<Mutex<Vec<(u8, u16, u16)>>>,
    /// Optional device emulation.
    cartridge: Arc<Mutex<Option<MockCartridge>>>,
    pending_write: Mutex<Option<PendingWrite>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    released: AtomicBool,
    fail_writes: AtomicBool,
    /// Cap on bytes accepted per write, to simulate short writes.
    write_limit: Mutex<Option<usize>>,
    /// Successful reads left before the device drops off the bus.
    reads_until_disconnect: Mutex<Option<usize>>,
    read_count: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            control_log: Arc::new(Mutex::new(Vec::new())),
            cartridge: Arc::new(Mutex::new(None)),
            pending_write: Mutex::new(None),
            vid: 0x1A86,
            pid: 0x7523,
            connected: Arc::new(Mutex::new(true)),
            released: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_limit: Mutex::new(None),
            reads_until_disconnect: Mutex::new(None),
            read_count: AtomicUsize::new(0),
        }
    }

    /// Transport emulating `cartridge`.
    pub fn with_cartridge(cartridge: MockCartridge) -> Self {
        let mock = Self::new();
        mock.insert_cartridge(cartridge);
        mock
    }

    /// Queue a raw response to be returned on a later read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.response_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Replace the emulated cartridge.
    pub fn insert_cartridge(&self, cartridge: MockCartridge) {
        *self.cartridge.lock().unwrap() = Some(cartridge);
    }

    /// Current emulated cartridge state.
    pub fn cartridge(&self) -> Option<MockCartridge> {
        self.cartridge.lock().unwrap().clone()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes that look like command lines.
    pub fn get_commands(&self) -> Vec<String> {
        self.get_writes()
            .iter()
            .filter(|w| w.last() == Some(&LINE_END))
            .map(|w| String::from_utf8_lossy(&w[..w.len() - 1]).into_owned())
            .collect()
    }

    /// Get all captured control requests.
    pub fn get_controls(&self) -> Vec<(u8, u16, u16)> {
        self.control_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Number of successful reads so far.
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Make every write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Accept at most `limit` bytes per write.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        *self.write_limit.lock().unwrap() = limit;
    }

    /// Drop off the bus after `reads` more successful reads.
    pub fn disconnect_after_reads(&self, reads: usize) {
        *self.reads_until_disconnect.lock().unwrap() = Some(reads);
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Whether `release` has been called since the last claim.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn usable(&self) -> bool {
        *self.connected.lock().unwrap() && !self.released.load(Ordering::SeqCst)
    }

    /// Feed a host write into the emulated device.
    fn emulate(&self, data: &[u8]) {
        let mut cart_guard = self.cartridge.lock().unwrap();
        let Some(cart) = cart_guard.as_mut() else {
            return;
        };

        let mut pending = self.pending_write.lock().unwrap();
        if let Some(write) = pending.as_mut() {
            if let Some(save) = cart.save.as_mut() {
                let end = (write.offset + data.len()).min(save.len());
                if write.offset < end {
                    save[write.offset..end].copy_from_slice(&data[..end - write.offset]);
                }
            }
            write.offset += data.len();
            write.remaining = write.remaining.saturating_sub(data.len());
            if write.remaining == 0 {
                *pending = None;
                self.queue_response(format!("{}\n", RESP_OK).as_bytes());
            }
            return;
        }

        let line = String::from_utf8_lossy(data);
        let line = line.trim_end();
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [CMD_RESET] => self.queue_response(cart.identity.as_bytes()),
            [CMD_INFO] => self.queue_response(cart.info_text().as_bytes()),
            [CMD_READ, region, offset, len] => {
                let (Ok(offset), Ok(len)) = (
                    usize::from_str_radix(offset, 16),
                    usize::from_str_radix(len, 16),
                ) else {
                    self.queue_response(b"ERR\n");
                    return;
                };
                let source: &[u8] = match *region {
                    REGION_ROM => &cart.rom,
                    REGION_SAVE => cart.save.as_deref().unwrap_or(&[]),
                    _ => &[],
                };
                let mut out = vec![0xFFu8; len];
                if offset < source.len() {
                    let end = (offset + len).min(source.len());
                    out[..end - offset].copy_from_slice(&source[offset..end]);
                }
                self.queue_response(&out);
            }
            [CMD_WRITE, REGION_SAVE, offset, len] => {
                match (
                    usize::from_str_radix(offset, 16),
                    usize::from_str_radix(len, 16),
                ) {
                    (Ok(offset), Ok(len)) if len > 0 => {
                        *pending = Some(PendingWrite {
                            offset,
                            remaining: len,
                        });
                    }
                    _ => self.queue_response(b"ERR\n"),
                }
            }
            _ => self.queue_response(b"ERR\n"),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.usable() {
            return Err(TransportError::Disconnected);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("injected failure".into()));
        }
        let accepted = match *self.write_limit.lock().unwrap() {
            Some(limit) => &data[..data.len().min(limit)],
            None => data,
        };
        self.write_log.lock().unwrap().push(accepted.to_vec());
        self.emulate(accepted);
        Ok(accepted.len())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.usable() {
            return Err(TransportError::Disconnected);
        }
        {
            let mut budget = self.reads_until_disconnect.lock().unwrap();
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    *budget = None;
                    drop(budget);
                    self.disconnect();
                    return Err(TransportError::Disconnected);
                }
                *left -= 1;
            }
        }

        let mut queue = self.response_queue.lock().unwrap();
        let mut front = queue
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 5000 })?;
        if front.len() > max_len {
            let rest = front.split_off(max_len);
            queue.push_front(rest);
        }
        self.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(front)
    }

    fn control_out(&self, request: u8, value: u16, index: u16) -> Result<(), TransportError> {
        if !self.usable() {
            return Err(TransportError::Disconnected);
        }
        self.control_log
            .lock()
            .unwrap()
            .push((request, value, index));
        Ok(())
    }

    fn release(&self) -> Result<(), TransportError> {
        self.released.store(true, Ordering::SeqCst);
        self.pending_write.lock().unwrap().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.usable()
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Mock host exposing a configurable device list backed by one transport.
pub struct MockHost {
    devices: Mutex<Vec<UsbDeviceInfo>>,
    transport: Arc<MockTransport>,
    permission: AtomicBool,
    fail_open: AtomicBool,
    fail_claim: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MockHost {
    /// Host with no attached devices.
    pub fn empty() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            transport: Arc::new(MockTransport::new()),
            permission: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            fail_claim: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Host with one vendor-class device at `vid:pid` served by `transport`.
    pub fn with_device(vid: u16, pid: u16, transport: MockTransport) -> Self {
        let host = Self {
            transport: Arc::new(transport),
            ..Self::empty()
        };
        host.attach(Self::device_info(vid, pid, 0xFF));
        host
    }

    /// Enumeration record for a single-interface device.
    pub fn device_info(vid: u16, pid: u16, class: u8) -> UsbDeviceInfo {
        UsbDeviceInfo {
            vendor_id: vid,
            product_id: pid,
            bus_id: "1".to_string(),
            address: 4,
            product: Some("Mock Reader".to_string()),
            interfaces: vec![UsbInterfaceInfo { number: 0, class }],
        }
    }

    pub fn attach(&self, device: UsbDeviceInfo) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn transport(&self) -> &Arc<MockTransport> {
        &self.transport
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_claim(&self, fail: bool) {
        self.fail_claim.store(fail, Ordering::SeqCst);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of handle closes.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl UsbHost for Arc<MockHost> {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn open(&self, _device: &UsbDeviceInfo) -> Result<Box<dyn UsbDeviceHandle>, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed("injected failure".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDeviceHandle {
            host: Arc::clone(self),
        }))
    }
}

struct MockDeviceHandle {
    host: Arc<MockHost>,
}

impl UsbDeviceHandle for MockDeviceHandle {
    fn claim_interface(&self, interface: u8) -> Result<Arc<dyn UsbTransport>, TransportError> {
        if self.host.fail_claim.load(Ordering::SeqCst) {
            return Err(TransportError::ClaimInterfaceFailed {
                interface,
                message: "injected failure".into(),
            });
        }
        self.host.transport.released.store(false, Ordering::SeqCst);
        let transport: Arc<dyn UsbTransport> = self.host.transport.clone();
        Ok(transport)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.host.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

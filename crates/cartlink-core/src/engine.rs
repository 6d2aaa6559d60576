//! CartReader - high-level engine tying discovery, session, protocol and
//! transfers together.
//!
//! One engine owns at most one session. Connecting again tears the old
//! session down first. Transfers validate their arguments on the caller's
//! thread and then run on a worker thread, so a rejected request never
//! touches the endpoints.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, instrument, warn};

use crate::cartridge::CartridgeInfo;
use crate::config::EngineConfig;
use crate::device::{
    DeviceCandidate, DeviceType, find_device, has_permission, scan, select_interface,
};
use crate::error::{CartError, Result};
use crate::events::{CartEvent, CartObserver, TracingObserver};
use crate::protocol::constants::HEADER_SIZE;
use crate::protocol::{CommandChannel, Region};
use crate::session::{ConnectionState, ObservableTransport, Session, release_resources};
use crate::transfer::{TransferHandle, TransferKind, worker};
use crate::transport::{NusbHost, TransportError, UsbHost, UsbTransport};

/// An attached reader as seen by `scan`.
#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub candidate: DeviceCandidate,
    /// Whether the reader can be opened without prompting.
    pub accessible: bool,
}

/// Cartridge reader engine.
pub struct CartReader<H: UsbHost, O: CartObserver> {
    host: H,
    config: EngineConfig,
    observer: Arc<O>,
    /// Serializes connect / disconnect / session teardown.
    lifecycle: Mutex<()>,
    session: Mutex<Option<Arc<Session>>>,
    state: Mutex<ConnectionState>,
    /// Last detected cartridge for the current session.
    cartridge: Mutex<Option<CartridgeInfo>>,
}

impl CartReader<NusbHost, TracingObserver> {
    /// Engine over the system USB stack with the default tracing observer.
    pub fn new(config: EngineConfig) -> Self {
        let host = NusbHost::new(config.timeout());
        Self::with_host(config, host, Arc::new(TracingObserver))
    }
}

impl<H: UsbHost, O: CartObserver + 'static> CartReader<H, O> {
    /// Engine over a custom USB host and observer.
    pub fn with_host(config: EngineConfig, host: H, observer: Arc<O>) -> Self {
        Self {
            host,
            config,
            observer,
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            cartridge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every attached supported reader with its permission status.
    pub fn scan(&self) -> Vec<ScannedDevice> {
        scan(&self.host)
            .into_iter()
            .map(|candidate| ScannedDevice {
                accessible: has_permission(&self.host, &candidate),
                candidate,
            })
            .collect()
    }

    /// Find, open and identify a reader.
    ///
    /// An existing session is torn down first. Every failure leaves the
    /// engine `Disconnected` with nothing acquired.
    #[instrument(skip(self))]
    pub fn connect(&self) -> Result<DeviceType> {
        let _lifecycle = lock(&self.lifecycle);
        if lock(&self.session).is_some() {
            info!("Already connected, replacing session");
            self.teardown();
        }

        match self.establish() {
            Ok(device_type) => Ok(device_type),
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.observer.on_event(&CartEvent::Error {
                    message: e.to_string(),
                });
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<DeviceType> {
        let candidate = find_device(&self.host).ok_or(CartError::NoDeviceFound)?;
        let (vid, pid) = (candidate.info.vendor_id, candidate.info.product_id);

        let interface =
            select_interface(&candidate.info).ok_or(CartError::NoSerialInterface { vid, pid })?;
        if !has_permission(&self.host, &candidate) {
            return Err(CartError::PermissionDenied { vid, pid });
        }

        self.set_state(ConnectionState::Opening);
        let handle = self
            .host
            .open(&candidate.info)
            .map_err(|e| match e {
                TransportError::PermissionDenied(_) => CartError::PermissionDenied { vid, pid },
                other => CartError::OpenFailed(other),
            })?;

        let raw = match handle.claim_interface(interface) {
            Ok(transport) => transport,
            Err(e) => {
                release_resources(Some(handle.as_ref()), None);
                return Err(CartError::ClaimFailed(e));
            }
        };
        self.set_state(ConnectionState::InterfaceClaimed);

        let transport: Arc<dyn UsbTransport> = Arc::new(ObservableTransport {
            inner: raw,
            observer: self.observer.clone(),
        });
        let channel = CommandChannel::new(transport.as_ref(), self.config.response_buffer);

        if self.config.configure_line
            && let Err(e) = channel.configure_line()
        {
            warn!(error = %e, "Line setup failed, continuing");
        }

        let (device_type, identification) = channel.identify();
        if device_type == DeviceType::Unknown {
            release_resources(Some(handle.as_ref()), Some(&transport));
            return Err(CartError::UnknownDeviceResponse {
                response: identification,
            });
        }

        let session = Session::new(
            handle,
            transport,
            interface,
            candidate.descriptor,
            device_type,
            identification,
            self.config.response_buffer,
        );
        *lock(&self.session) = Some(Arc::new(session));
        *lock(&self.cartridge) = None;
        self.set_state(ConnectionState::Connected);

        info!(
            vid = %format!("{:04X}", vid),
            pid = %format!("{:04X}", pid),
            device = %device_type,
            interface,
            "Reader connected"
        );
        self.observer.on_event(&CartEvent::DeviceConnected {
            vid,
            pid,
            device_type,
        });
        Ok(device_type)
    }

    /// Tear down the session. Safe to call in any state, any number of times.
    #[instrument(skip(self))]
    pub fn disconnect(&self) {
        let _lifecycle = lock(&self.lifecycle);
        self.teardown();
    }

    /// Caller must hold `lifecycle`.
    fn teardown(&self) {
        let session = lock(&self.session).take();
        *lock(&self.cartridge) = None;
        if let Some(session) = session {
            session.close();
            self.observer.on_event(&CartEvent::DeviceDisconnected);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop `dead` if it is still the current session.
    fn discard_session(&self, dead: &Arc<Session>) {
        let _lifecycle = lock(&self.lifecycle);
        let is_current = lock(&self.session)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, dead));
        if is_current {
            warn!("Reader no longer responding, dropping session");
            self.teardown();
        }
    }

    /// Connected with a live session.
    pub fn is_available(&self) -> bool {
        *lock(&self.state) == ConnectionState::Connected
            && lock(&self.session).as_ref().is_some_and(|s| s.is_live())
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Detected reader family, `Unknown` when not connected.
    pub fn device_type(&self) -> DeviceType {
        lock(&self.session)
            .as_ref()
            .map_or(DeviceType::Unknown, |s| s.device_type())
    }

    /// Human-readable reader summary, only while available.
    pub fn device_info(&self) -> Option<String> {
        if !self.is_available() {
            return None;
        }
        let session = lock(&self.session).clone()?;
        let descriptor = session.descriptor();
        Some(format!(
            "{} [{}] on interface {}: {}",
            session.device_type(),
            descriptor,
            session.interface(),
            session.identification()
        ))
    }

    fn set_state(&self, to: ConnectionState) {
        let from = std::mem::replace(&mut *lock(&self.state), to);
        if from != to {
            self.observer
                .on_event(&CartEvent::StateChanged { from, to });
        }
    }

    /// Current session if it is still usable. A session whose device has
    /// gone is torn down here.
    fn live_session(&self) -> Result<Arc<Session>> {
        let current = lock(&self.session).clone();
        match current {
            Some(session) if session.is_live() => Ok(session),
            Some(dead) => {
                self.discard_session(&dead);
                Err(CartError::NotConnected)
            }
            None => Err(CartError::NotConnected),
        }
    }

    /// Query the inserted cartridge and read its header.
    #[instrument(skip(self))]
    pub fn cartridge_info(&self) -> Result<CartridgeInfo> {
        let session = self.live_session()?;
        self.detect_cartridge(&session)
    }

    fn detect_cartridge(&self, session: &Session) -> Result<CartridgeInfo> {
        *lock(&self.cartridge) = None;

        let meta = session
            .exchange(|channel| Ok(channel.query_cartridge()))
            .map_err(|_| CartError::NotConnected)?
            .ok_or(CartError::NoCartridge)?;

        let header_len = HEADER_SIZE.min(meta.rom_size);
        let header = session
            .exchange(|channel| channel.read_block(Region::Rom, 0, header_len))
            .map_err(|source| CartError::TransferIo { offset: 0, source })?;

        let cartridge = CartridgeInfo::from_header(&header, meta);
        info!(cartridge = %cartridge, "Cartridge detected");
        self.observer.on_event(&CartEvent::CartridgeDetected {
            title: cartridge.title.clone(),
            game_code: cartridge.game_code.clone(),
        });
        *lock(&self.cartridge) = Some(cartridge.clone());
        Ok(cartridge)
    }

    /// Cached cartridge, detecting it first if needed.
    fn known_cartridge(&self, session: &Session) -> Result<CartridgeInfo> {
        if let Some(cartridge) = lock(&self.cartridge).clone() {
            return Ok(cartridge);
        }
        self.detect_cartridge(session)
    }

    /// Save size of the cartridge detected in this session. Never touches
    /// the reader.
    fn detected_save_size(&self) -> Result<usize> {
        match lock(&self.cartridge).as_ref() {
            Some(cartridge) => save_size(cartridge),
            None => Err(CartError::SaveSizeUnknown),
        }
    }

    fn observer_handle(&self) -> Arc<dyn CartObserver> {
        self.observer.clone()
    }

    /// Start reading `length` ROM bytes from `offset`, clipped to the
    /// cartridge end.
    #[instrument(skip(self))]
    pub fn start_read_rom(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<TransferHandle<Vec<u8>>> {
        let session = self.live_session()?;
        let cartridge = self.known_cartridge(&session)?;
        if offset >= cartridge.rom_size {
            return Err(CartError::OutOfRange {
                offset,
                length,
                limit: cartridge.rom_size,
            });
        }

        let len = length.min(cartridge.rom_size - offset);
        if len < length {
            info!(requested = length, clipped = len, "Read clipped to ROM end");
        }
        let chunk_size = self.config.effective_chunk_size();
        TransferHandle::spawn(TransferKind::RomRead, self.observer_handle(), move |sink| {
            worker::read_region(&session, Region::Rom, offset, len, chunk_size, sink)
        })
    }

    /// Start reading the whole save memory of the cartridge found by the
    /// last `cartridge_info` call.
    #[instrument(skip(self))]
    pub fn start_read_save(&self) -> Result<TransferHandle<Vec<u8>>> {
        let session = self.live_session()?;
        let save_size = self.detected_save_size()?;
        let chunk_size = self.config.effective_chunk_size();
        TransferHandle::spawn(TransferKind::SaveRead, self.observer_handle(), move |sink| {
            worker::read_region(&session, Region::Save, 0, save_size, chunk_size, sink)
        })
    }

    /// Start writing `data` over the whole save memory of the cartridge
    /// found by the last `cartridge_info` call.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn start_write_save(&self, data: Vec<u8>) -> Result<TransferHandle<()>> {
        let session = self.live_session()?;
        let expected = self.detected_save_size()?;
        if data.len() != expected {
            return Err(CartError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let chunk_size = self.config.effective_chunk_size();
        TransferHandle::spawn(TransferKind::SaveWrite, self.observer_handle(), move |sink| {
            worker::write_region(&session, Region::Save, 0, &data, chunk_size, sink)
        })
    }

    /// Read ROM bytes, blocking until done. `on_progress` gets each
    /// chunk's completed fraction in order, ending at 1.0.
    pub fn read_rom(
        &self,
        offset: usize,
        length: usize,
        on_progress: impl FnMut(f32),
    ) -> Result<Vec<u8>> {
        self.start_read_rom(offset, length)?.wait_with(on_progress)
    }

    /// Read the whole save memory, blocking until done. Requires a prior
    /// `cartridge_info`.
    pub fn read_save(&self, on_progress: impl FnMut(f32)) -> Result<Vec<u8>> {
        self.start_read_save()?.wait_with(on_progress)
    }

    /// Write the whole save memory, blocking until done. Requires a prior
    /// `cartridge_info`; `data` must match the save size exactly.
    pub fn write_save(&self, data: &[u8], on_progress: impl FnMut(f32)) -> Result<()> {
        self.start_write_save(data.to_vec())?.wait_with(on_progress)
    }
}

impl<H: UsbHost, O: CartObserver> Drop for CartReader<H, O> {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.close();
        }
    }
}

fn save_size(cartridge: &CartridgeInfo) -> Result<usize> {
    match cartridge.save_size {
        None => Err(CartError::SaveSizeUnknown),
        Some(0) => Err(CartError::NoSaveMemory),
        Some(size) => Ok(size),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

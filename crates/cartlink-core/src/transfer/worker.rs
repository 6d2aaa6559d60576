//! Chunk loops run on the transfer worker thread.

use std::sync::Arc;
use std::sync::mpsc::Sender;

use tracing::{debug, info, instrument, warn};

use super::chunk::ChunkPlan;
use super::{CancelToken, TransferKind, TransferProgress};
use crate::error::{CartError, Result};
use crate::events::{CartEvent, CartObserver};
use crate::protocol::Region;
use crate::session::Session;

/// Worker-side end of the progress channel.
pub struct ProgressSink {
    kind: TransferKind,
    sender: Sender<TransferProgress>,
    cancel: CancelToken,
    observer: Arc<dyn CartObserver>,
}

impl ProgressSink {
    pub(crate) fn new(
        kind: TransferKind,
        sender: Sender<TransferProgress>,
        cancel: CancelToken,
        observer: Arc<dyn CartObserver>,
    ) -> Self {
        Self {
            kind,
            sender,
            cancel,
            observer,
        }
    }

    /// Publish progress after a chunk.
    pub fn report(&self, completed: usize, total: usize) {
        let update = TransferProgress {
            kind: self.kind,
            completed,
            total,
        };
        // Receiver gone means nobody is listening; the transfer still completes.
        let _ = self.sender.send(update);
        self.observer.on_event(&CartEvent::Progress {
            kind: self.kind,
            current: completed as u64,
            total: total as u64,
        });
    }

    /// Chunk-boundary check for cancellation and a torn-down session.
    pub fn checkpoint(&self, session: &Session) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!(operation = %self.kind, "Transfer cancelled");
            return Err(CartError::Cancelled);
        }
        if !session.is_live() {
            warn!(operation = %self.kind, "Session gone, aborting transfer");
            return Err(CartError::NotConnected);
        }
        Ok(())
    }
}

/// Read `len` bytes of `region` starting at `base`.
#[instrument(skip(session, sink))]
pub(crate) fn read_region(
    session: &Session,
    region: Region,
    base: usize,
    len: usize,
    chunk_size: usize,
    sink: &ProgressSink,
) -> Result<Vec<u8>> {
    let plan = ChunkPlan::new(base, len, chunk_size);
    debug!(chunks = plan.total_chunks(), chunk_size = plan.chunk_size(), "Starting read");

    let mut out = Vec::with_capacity(len);
    for chunk in plan {
        sink.checkpoint(session)?;
        let data = session
            .exchange(|channel| channel.read_block(region, chunk.offset, chunk.len))
            .map_err(|source| CartError::TransferIo {
                offset: chunk.offset,
                source,
            })?;
        out.extend_from_slice(&data);
        sink.report(out.len(), len);
    }

    if len == 0 {
        sink.report(0, 0);
    }
    info!(bytes = out.len(), "Read complete");
    Ok(out)
}

/// Write all of `data` into `region` starting at `base`.
#[instrument(skip(session, data, sink), fields(len = data.len()))]
pub(crate) fn write_region(
    session: &Session,
    region: Region,
    base: usize,
    data: &[u8],
    chunk_size: usize,
    sink: &ProgressSink,
) -> Result<()> {
    let plan = ChunkPlan::new(base, data.len(), chunk_size);
    debug!(chunks = plan.total_chunks(), chunk_size = plan.chunk_size(), "Starting write");

    for chunk in plan {
        sink.checkpoint(session)?;
        let payload = &data[chunk.start..chunk.start + chunk.len];
        session
            .exchange(|channel| channel.write_block(region, chunk.offset, payload))
            .map_err(|source| CartError::TransferIo {
                offset: chunk.offset,
                source,
            })?;
        sink.report(chunk.start + chunk.len, data.len());
    }

    if data.is_empty() {
        sink.report(0, 0);
    }
    info!(bytes = data.len(), "Write complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};

    use super::*;
    use crate::device::{DeviceType, lookup};
    use crate::events::NullObserver;
    use crate::transport::{MockCartridge, MockHost, MockTransport, UsbHost};

    fn session_over(host: &Arc<MockHost>) -> Session {
        let info = host.devices().unwrap().remove(0);
        let handle = host.open(&info).unwrap();
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

    fn sink(kind: TransferKind) -> (ProgressSink, Receiver<TransferProgress>, CancelToken) {
        let (sender, receiver) = mpsc::channel();
        let cancel = CancelToken::new();
        (
            ProgressSink::new(kind, sender, cancel.clone(), Arc::new(NullObserver)),
            receiver,
            cancel,
        )
    }

    fn host_with_rom(len: usize) -> Arc<MockHost> {
        let rom: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        Arc::new(MockHost::with_device(
            0x1A86,
            0x7523,
            MockTransport::with_cartridge(MockCartridge::new(
                "GBxCart",
                rom,
                Some(vec![0u8; 8192]),
            )),
        ))
    }

    #[test]
    fn test_read_region_progress() {
        let host = host_with_rom(10_000);
        let session = session_over(&host);
        let (sink, receiver, _) = sink(TransferKind::RomRead);

        let data = read_region(&session, Region::Rom, 100, 9_000, 4096, &sink).unwrap();
        drop(sink);

        assert_eq!(data.len(), 9_000);
        assert_eq!(data[0], (100 % 251) as u8);

        let updates: Vec<_> = receiver.iter().collect();
        assert_eq!(
            updates.iter().map(|u| u.completed).collect::<Vec<_>>(),
            vec![4096, 8192, 9000]
        );
        assert_eq!(updates.last().unwrap().fraction(), 1.0);
    }

    #[test]
    fn test_cancelled_before_first_chunk() {
        let host = host_with_rom(10_000);
        let session = session_over(&host);
        let (sink, receiver, cancel) = sink(TransferKind::RomRead);
        cancel.cancel();

        let result = read_region(&session, Region::Rom, 0, 9_000, 4096, &sink);
        drop(sink);

        assert!(matches!(result, Err(CartError::Cancelled)));
        assert!(host.transport().get_writes().is_empty());
        assert_eq!(receiver.iter().count(), 0);
    }

    #[test]
    fn test_closed_session_aborts() {
        let host = host_with_rom(10_000);
        let session = session_over(&host);
        session.close();
        let (sink, _receiver, _) = sink(TransferKind::SaveWrite);

        let result = write_region(&session, Region::Save, 0, &[1u8; 8192], 4096, &sink);
        assert!(matches!(result, Err(CartError::NotConnected)));
    }

    #[test]
    fn test_write_region_chunks() {
        let host = host_with_rom(1024);
        let session = session_over(&host);
        let (sink, receiver, _) = sink(TransferKind::SaveWrite);

        let data: Vec<u8> = (0..8192).map(|i| (i % 7) as u8).collect();
        write_region(&session, Region::Save, 0, &data, 4096, &sink).unwrap();
        drop(sink);

        assert_eq!(host.transport().cartridge().unwrap().save.unwrap(), data);
        let commands = host.transport().get_commands();
        assert_eq!(commands, vec!["WRITE SAVE 0 1000", "WRITE SAVE 1000 1000"]);
        assert_eq!(receiver.iter().last().unwrap().fraction(), 1.0);
    }

    #[test]
    fn test_chunk_failure_aborts() {
        let host = host_with_rom(10_000);
        let session = session_over(&host);
        host.transport().disconnect_after_reads(1);
        let (sink, receiver, _) = sink(TransferKind::RomRead);

        let result = read_region(&session, Region::Rom, 0, 9_000, 4096, &sink);
        drop(sink);

        match result {
            Err(CartError::TransferIo { offset, source }) => {
                assert_eq!(offset, 4096);
                assert!(source.is_disconnect());
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }
        assert_eq!(receiver.iter().count(), 1);
        assert!(!session.is_live());
    }
}

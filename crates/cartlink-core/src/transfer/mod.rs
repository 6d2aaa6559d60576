//! Transfer engine: chunked ROM / save transfers on a worker thread.
//!
//! Progress is a produced sequence: the worker sends one `TransferProgress`
//! per completed chunk over a channel, in chunk order, and the channel
//! closes when the worker is done. `TransferHandle` owns both ends of that
//! contract and the worker's result.

pub mod chunk;
pub mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

pub use chunk::{Chunk, ChunkPlan};
pub use worker::ProgressSink;

use crate::error::{CartError, Result};
use crate::events::CartObserver;
use crate::transport::TransportError;

/// What a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    RomRead,
    SaveRead,
    SaveWrite,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::RomRead => write!(f, "ROM read"),
            TransferKind::SaveRead => write!(f, "Save read"),
            TransferKind::SaveWrite => write!(f, "Save write"),
        }
    }
}

/// Progress after one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub kind: TransferKind,
    pub completed: usize,
    pub total: usize,
}

impl TransferProgress {
    /// Completed fraction in [0, 1]. Exactly 1.0 once `completed == total`.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 || self.completed >= self.total {
            1.0
        } else {
            (self.completed as f64 / self.total as f64) as f32
        }
    }
}

/// Shared cancellation flag, observed at chunk boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A running transfer.
///
/// Dropping the handle without `wait` cancels the transfer at the next
/// chunk boundary.
pub struct TransferHandle<T> {
    kind: TransferKind,
    progress: Receiver<TransferProgress>,
    cancel: CancelToken,
    /// Taken by `wait`.
    worker: Option<JoinHandle<Result<T>>>,
}

impl<T: Send + 'static> TransferHandle<T> {
    /// Run `job` on a dedicated worker thread.
    pub(crate) fn spawn<F>(
        kind: TransferKind,
        observer: Arc<dyn CartObserver>,
        job: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ProgressSink) -> Result<T> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (sender, progress) = mpsc::channel();
        let sink = ProgressSink::new(kind, sender, cancel.clone(), observer);

        let worker = thread::Builder::new()
            .name(format!("cartlink-{}", kind).replace(' ', "-").to_lowercase())
            .spawn(move || job(&sink))
            .map_err(|e| CartError::TransferIo {
                offset: 0,
                source: TransportError::Io(e),
            })?;

        Ok(Self {
            kind,
            progress,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Blocking iterator over progress updates; ends when the worker stops.
    pub fn progress(&self) -> impl Iterator<Item = TransferProgress> + '_ {
        self.progress.iter()
    }

    /// Next progress update if one is already queued.
    pub fn try_progress(&self) -> Option<TransferProgress> {
        self.progress.try_recv().ok()
    }

    /// Token that cancels this transfer at the next chunk boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker and return its result.
    pub fn wait(mut self) -> Result<T> {
        let Some(worker) = self.worker.take() else {
            return Err(CartError::Cancelled);
        };
        match worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Forward every progress fraction to `on_progress` in order, then wait.
    pub fn wait_with(self, mut on_progress: impl FnMut(f32)) -> Result<T> {
        for update in self.progress.iter() {
            on_progress(update.fraction());
        }
        self.wait()
    }
}

impl<T> Drop for TransferHandle<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;

    #[test]
    fn test_fraction_bounds() {
        let p = |completed, total| TransferProgress {
            kind: TransferKind::RomRead,
            completed,
            total,
        };
        assert_eq!(p(0, 0).fraction(), 1.0);
        assert_eq!(p(0, 10).fraction(), 0.0);
        assert_eq!(p(5, 10).fraction(), 0.5);
        assert_eq!(p(10, 10).fraction(), 1.0);
        assert!(p(33_554_431, 33_554_432).fraction() <= 1.0);
        assert_eq!(p(33_554_432, 33_554_432).fraction(), 1.0);
    }

    #[test]
    fn test_handle_forwards_progress_in_order() {
        let handle = TransferHandle::spawn(TransferKind::RomRead, Arc::new(NullObserver), |sink| {
            for done in [10, 20, 30] {
                sink.report(done, 30);
            }
            Ok(42u32)
        })
        .unwrap();

        let mut seen = Vec::new();
        let result = handle.wait_with(|f| seen.push(f)).unwrap();
        assert_eq!(result, 42);
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[test]
    fn test_handle_error_result() {
        let handle: TransferHandle<()> =
            TransferHandle::spawn(TransferKind::SaveWrite, Arc::new(NullObserver), |_| {
                Err(CartError::NotConnected)
            })
            .unwrap();
        assert!(matches!(handle.wait(), Err(CartError::NotConnected)));
    }

    #[test]
    fn test_drop_cancels_worker() {
        let (release, gate) = mpsc::channel::<()>();
        let handle = TransferHandle::spawn(TransferKind::SaveWrite, Arc::new(NullObserver), move |_| {
            let _ = gate.recv();
            Ok(())
        })
        .unwrap();
        let token = handle.cancel_token();
        assert!(!token.is_cancelled());

        drop(handle);
        assert!(token.is_cancelled());
        release.send(()).unwrap();
    }

    #[test]
    fn test_wait_does_not_cancel() {
        let handle =
            TransferHandle::spawn(TransferKind::RomRead, Arc::new(NullObserver), |_| Ok(7u8))
                .unwrap();
        let token = handle.cancel_token();
        assert_eq!(handle.wait().unwrap(), 7);
        assert!(!token.is_cancelled());
    }
}

//! Background execution of the flash writer
//!
//! One named worker thread per flash, at most one at a time. The worker is
//! the only writer of the shared [`FlashOperation`] snapshot; any thread can
//! read it. Progress events are also pushed over a bounded channel and are
//! dropped when the reader falls behind, so the worker never blocks on the
//! caller.

use crossbeam::channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

use crate::error::{FlashError, RunnerError};
use crate::flash::{FlashDevice, FlashPhase, FlashReport, FlashWriter};
use crate::operation::FlashOperation;
use crate::storage::Storage;

/// Capacity of the per-flash progress channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

const WORKER_THREAD_NAME: &str = "fwstage-flash";

/// One progress report from the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Bytes written so far
    pub bytes_written: u64,
    /// Image size
    pub total: u64,
    /// Phase the report belongs to
    pub phase: FlashPhase,
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    snapshot: RwLock<Option<FlashOperation>>,
}

/// Releases the running flag when the worker exits, including by panic
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Runs flashes on a dedicated worker thread
pub struct FlashTaskRunner<D> {
    device: Arc<Mutex<D>>,
    storage: Arc<dyn Storage>,
    writer: FlashWriter,
    shared: Arc<Shared>,
}

impl<D> FlashTaskRunner<D>
where
    D: FlashDevice + 'static,
{
    /// Create a runner over shared device and storage handles
    pub fn new(device: Arc<Mutex<D>>, storage: Arc<dyn Storage>, writer: FlashWriter) -> Self {
        Self {
            device,
            storage,
            writer,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Whether a flash is in progress
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Copy of the latest operation state, `None` before the first flash
    pub fn snapshot(&self) -> Option<FlashOperation> {
        self.shared.snapshot.read().clone()
    }

    /// Drop the snapshot of a finished operation once its result was seen
    pub fn clear_finished(&self) -> bool {
        let mut snapshot = self.shared.snapshot.write();
        if snapshot.as_ref().is_some_and(FlashOperation::is_finished) {
            *snapshot = None;
            true
        } else {
            false
        }
    }

    /// Start flashing `path` into the staging region.
    ///
    /// # Errors
    ///
    /// [`RunnerError::AlreadyRunning`] if a flash is still in progress, or
    /// [`RunnerError::Spawn`] if the worker thread could not be created.
    pub fn start(&self, path: impl Into<PathBuf>) -> Result<FlashHandle, RunnerError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejected flash request, worker busy");
            return Err(RunnerError::AlreadyRunning);
        }

        let path = path.into();
        *self.shared.snapshot.write() = Some(FlashOperation::new(path.clone()));

        let (tx, rx) = crossbeam::channel::bounded(PROGRESS_CHANNEL_CAPACITY);
        let device = Arc::clone(&self.device);
        let storage = Arc::clone(&self.storage);
        let writer = self.writer.clone();
        let shared = Arc::clone(&self.shared);
        let worker_path = path.clone();

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(&writer, &device, storage.as_ref(), worker_path, shared, tx));

        match spawned {
            Ok(thread) => {
                info!(path = %path.display(), "Flash worker started");
                Ok(FlashHandle {
                    progress: rx,
                    thread,
                })
            }
            Err(e) => {
                error!("Failed to spawn flash worker: {}", e);
                if let Some(op) = self.shared.snapshot.write().as_mut() {
                    op.fail(e.to_string());
                }
                self.shared.running.store(false, Ordering::Release);
                Err(RunnerError::Spawn(e))
            }
        }
    }
}

fn run_worker<D: FlashDevice>(
    writer: &FlashWriter,
    device: &Mutex<D>,
    storage: &dyn Storage,
    path: PathBuf,
    shared: Arc<Shared>,
    tx: Sender<ProgressEvent>,
) -> Result<FlashReport, FlashError> {
    let _running = RunningGuard(Arc::clone(&shared));

    let result = {
        let mut device = device.lock();
        writer.flash(&mut *device, storage, &path, |bytes_written, total, phase| {
            if let Some(op) = shared.snapshot.write().as_mut() {
                op.apply(bytes_written, total, phase);
            }

            let event = ProgressEvent {
                bytes_written,
                total,
                phase,
            };
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(%phase, bytes_written, "Progress event dropped");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        })
    };

    if let Err(e) = &result {
        if let Some(op) = shared.snapshot.write().as_mut() {
            op.fail(e.to_string());
        }
    }

    result
}

/// Caller's side of a running flash
pub struct FlashHandle {
    progress: Receiver<ProgressEvent>,
    thread: JoinHandle<Result<FlashReport, FlashError>>,
}

impl FlashHandle {
    /// Drain progress events received so far without blocking
    pub fn try_progress(&self) -> Vec<ProgressEvent> {
        self.progress.try_iter().collect()
    }

    /// Block until the next progress event, `None` once the worker is gone
    pub fn recv_progress(&self) -> Option<ProgressEvent> {
        self.progress.recv().ok()
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker and return the writer's result
    pub fn join(self) -> Result<FlashReport, RunnerError> {
        match self.thread.join() {
            Ok(result) => result.map_err(RunnerError::Flash),
            Err(_) => {
                error!("Flash worker panicked");
                Err(RunnerError::WorkerPanicked)
            }
        }
    }
}

impl std::fmt::Debug for FlashHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashHandle")
            .field("pending_events", &self.progress.len())
            .field("finished", &self.thread.is_finished())
            .finish()
    }
}

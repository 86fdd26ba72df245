//! Staging manager facade
//!
//! Front-ends talk to the staging subsystem only through [`StagingManager`].
//! It owns the boot decision store, shares the device with the background
//! flash runner, and enforces the preconditions that keep the launcher
//! recoverable.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::boot::{
    BootOrchestrator, BootOutcome, BootTargetSelector, ensure_image_staged,
    ensure_rollback_target,
};
use crate::config::StagingConfig;
use crate::decision::{BootDecisionStore, KvStore};
use crate::error::{BootError, FlashError, RunnerError, ValidationError};
use crate::flash::{FlashDevice, FlashPhase, FlashReport, FlashWriter};
use crate::image::{ImageMeta, ImageValidator};
use crate::operation::FlashOperation;
use crate::region::{FirmwareRegion, RegionKind, RegionTrustState};
use crate::runner::{FlashHandle, FlashTaskRunner};
use crate::scanner::{FirmwareImageCandidate, StorageScanner};
use crate::storage::Storage;

/// One region as reported by [`StagingManager::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStatus {
    /// Region geometry
    pub region: FirmwareRegion,

    /// Trust verdict, `None` if it could not be read
    pub trust: Option<RegionTrustState>,
}

/// Point-in-time view of the staging subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStatus {
    /// Launcher region, if present
    pub launcher: Option<RegionStatus>,

    /// Staging region, if present
    pub staging: Option<RegionStatus>,

    /// Region the next reset will start, `None` if unreadable
    pub next_boot: Option<RegionKind>,

    /// Whether a one-shot boot is requested
    pub run_once_requested: bool,

    /// Whether the staging region holds a bootable image
    pub firmware_staged: bool,

    /// Latest flash operation, if any
    pub flash: Option<FlashOperation>,
}

/// Facade over the validator, scanner, writer, decision store and runner
pub struct StagingManager<D, K> {
    config: StagingConfig,
    device: Arc<Mutex<D>>,
    storage: Arc<dyn Storage>,
    decisions: BootDecisionStore<K>,
    scanner: StorageScanner,
    writer: FlashWriter,
    runner: FlashTaskRunner<D>,
    launcher: Option<FirmwareRegion>,
    staging: Option<FirmwareRegion>,
    boot_outcome: Option<BootOutcome>,
}

impl<D, K> StagingManager<D, K>
where
    D: FlashDevice + BootTargetSelector + 'static,
    K: KvStore,
{
    /// Create a manager. The region table is read once here.
    pub fn new(
        config: StagingConfig,
        device: D,
        store: K,
        storage: impl Storage + 'static,
    ) -> Self {
        let launcher = FlashDevice::region(&device, RegionKind::Launcher);
        let staging = FlashDevice::region(&device, RegionKind::Staging);
        if staging.is_none() {
            warn!("Device has no staging region, flashing is unavailable");
        }

        let device = Arc::new(Mutex::new(device));
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let writer = FlashWriter::new(
            config.image.clone(),
            config.chunk_size,
            config.progress_interval,
        );
        let runner =
            FlashTaskRunner::new(Arc::clone(&device), Arc::clone(&storage), writer.clone());

        Self {
            decisions: BootDecisionStore::with_namespace(store, config.namespace.clone()),
            scanner: StorageScanner::new(config.image.clone()),
            config,
            device,
            storage,
            writer,
            runner,
            launcher,
            staging,
            boot_outcome: None,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Shared device handle
    pub fn device(&self) -> &Arc<Mutex<D>> {
        &self.device
    }

    /// Boot decision store
    pub fn decisions(&self) -> &BootDecisionStore<K> {
        &self.decisions
    }

    /// List candidate images in `directory`
    pub fn scan_firmware(
        &self,
        directory: impl AsRef<Path>,
        max_results: usize,
    ) -> Vec<FirmwareImageCandidate> {
        self.scanner.scan(
            self.storage.as_ref(),
            directory.as_ref(),
            max_results,
            self.config.include_hidden,
        )
    }

    /// List candidates in the configured firmware directory
    pub fn scan_default(&self) -> Vec<FirmwareImageCandidate> {
        self.scan_firmware(&self.config.firmware_dir, self.config.max_scan_results)
    }

    /// Validate an image against the staging region without writing it
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<ImageMeta, ValidationError> {
        let capacity = self.staging.as_ref().map_or(u64::MAX, |r| r.capacity);
        ImageValidator::new(self.config.image.clone(), capacity)
            .validate(self.storage.as_ref(), path.as_ref())
    }

    /// Flash `path` on the calling thread.
    ///
    /// Waits for a background flash to finish before starting.
    pub fn flash<F>(&self, path: impl AsRef<Path>, progress: F) -> Result<FlashReport, FlashError>
    where
        F: FnMut(u64, u64, FlashPhase),
    {
        let mut device = self.device.lock();
        self.writer
            .flash(&mut *device, self.storage.as_ref(), path.as_ref(), progress)
    }

    /// Flash `path` on the background worker
    pub fn start_flash(&self, path: impl Into<PathBuf>) -> Result<FlashHandle, RunnerError> {
        self.runner.start(path)
    }

    /// Whether a background flash is in progress
    pub fn is_flash_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Latest background flash snapshot
    pub fn flash_snapshot(&self) -> Option<FlashOperation> {
        self.runner.snapshot()
    }

    /// Whether the staging region holds an image that can be booted.
    ///
    /// Returns `false` while a flash is in progress.
    pub fn is_firmware_staged(&self) -> bool {
        match self.device.try_lock() {
            Some(device) => ensure_image_staged(&*device, &self.config.image).is_ok(),
            None => false,
        }
    }

    /// Request that the staged image boots once on the next start.
    ///
    /// # Errors
    ///
    /// [`BootError::NoRollbackTarget`] if the launcher is missing or
    /// untrusted, [`BootError::NothingStaged`] if no image is staged. The
    /// decision record is not touched in either case.
    pub fn request_run_once(&mut self) -> Result<(), BootError> {
        {
            let Some(device) = self.device.try_lock() else {
                warn!("Run-once refused while a flash is in progress");
                return Err(BootError::NothingStaged);
            };
            ensure_rollback_target(&*device)?;
            if let Err(e) = ensure_image_staged(&*device, &self.config.image) {
                warn!("Run-once refused, nothing staged");
                return Err(e);
            }
        }

        self.decisions.request_run_once()?;
        info!("Staged image will boot once on next start");
        Ok(())
    }

    /// Run the startup boot decision for this device start.
    ///
    /// Only the first call acts. Later calls return its outcome, which is
    /// the fail-closed `Confirmed` outcome if the first call failed.
    pub fn boot(&mut self) -> Result<BootOutcome, BootError> {
        if let Some(outcome) = self.boot_outcome {
            return Ok(outcome);
        }

        let mut device = self.device.lock();
        let mut orchestrator = BootOrchestrator::new(&mut self.decisions, &mut *device)
            .with_format(self.config.image.clone());
        let result = orchestrator.evaluate();
        self.boot_outcome = orchestrator.outcome();
        result
    }

    /// Outcome of this start's boot decision, once [`boot`](Self::boot) ran
    pub fn boot_outcome(&self) -> Option<BootOutcome> {
        self.boot_outcome
    }

    /// Current subsystem state
    pub fn status(&self) -> StagingStatus {
        let run_once_requested = match self.decisions.peek() {
            Ok(v) => v,
            Err(e) => {
                warn!("Could not read boot decision: {}", e);
                false
            }
        };
        let flash = self.runner.snapshot();

        let Some(device) = self.device.try_lock() else {
            let unread = |region| RegionStatus {
                region,
                trust: None,
            };
            return StagingStatus {
                launcher: self.launcher.clone().map(unread),
                staging: self.staging.clone().map(unread),
                next_boot: None,
                run_once_requested,
                firmware_staged: false,
                flash,
            };
        };

        let region_status = |kind| {
            FlashDevice::region(&*device, kind).map(|region| RegionStatus {
                region,
                trust: device.trust_state(kind).ok(),
            })
        };

        StagingStatus {
            launcher: region_status(RegionKind::Launcher),
            staging: region_status(RegionKind::Staging),
            next_boot: device.boot_target().ok(),
            run_once_requested,
            firmware_staged: ensure_image_staged(&*device, &self.config.image).is_ok(),
            flash,
        }
    }
}

//! Convenience re-exports for common staging types

pub use crate::boot::{
    BootOrchestrator, BootOutcome, BootState, BootTargetSelector, ensure_image_staged,
    ensure_rollback_target,
};
pub use crate::config::{ConfigError, StagingConfig};
pub use crate::decision::{BootDecisionStore, FileKvStore, KvStore, MemoryKvStore};
pub use crate::error::{
    BootError, FlashError, RunnerError, ScanError, SelectorError, StoreError, ValidationError,
};
pub use crate::flash::{FlashDevice, FlashPhase, FlashReport, FlashWriter, WriteTransaction};
pub use crate::image::{ImageFormat, ImageHeader, ImageMeta, ImageValidator};
pub use crate::manager::{RegionStatus, StagingManager, StagingStatus};
pub use crate::operation::FlashOperation;
pub use crate::region::{FirmwareRegion, RegionKind, RegionTrustState};
pub use crate::runner::{FlashHandle, FlashTaskRunner, ProgressEvent};
pub use crate::scanner::{FirmwareImageCandidate, StorageScanner};
pub use crate::sim::SimulatedDevice;
pub use crate::storage::{DirEntryInfo, LocalStorage, Storage};

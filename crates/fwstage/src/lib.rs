//! Firmware staging and boot orchestration for dual-region devices
//!
//! This crate manages an alternate firmware image on a device with two code
//! regions: a trusted, factory-installed launcher and a writable staging
//! region. It provides:
//! - Image validation (extension, header magic, size bounds)
//! - Scanning removable storage for candidate images
//! - Chunked flashing into the staging region with progress reporting
//! - A persisted one-shot "boot the staged image next" flag
//! - A boot-time state machine that arms the platform's pending-verify
//!   rollback primitive and otherwise keeps the launcher authoritative
//! - A worker-thread runner so flashing never blocks the caller's loop
//!
//! # Architecture
//!
//! - [`region`]: Region identifiers, geometry and hardware trust states
//! - [`image`]: Image header parsing and validation
//! - [`storage`]: Removable-storage collaborator interface
//! - [`scanner`]: Candidate discovery
//! - [`flash`]: Flash device capability and the chunked writer
//! - [`operation`]: Shared flash progress snapshot
//! - [`decision`]: Key/value persistence and the one-shot boot flag
//! - [`boot`]: Boot target capability and the startup orchestrator
//! - [`runner`]: Background flash execution
//! - [`manager`]: Facade used by front-ends
//! - [`config`]: Runtime configuration
//! - [`sim`]: File-backed device model for hosts and tests
//! - [`error`]: Error types
//!
//! # Safety
//!
//! Flashing never changes which region boots next. Only the boot
//! orchestrator does, and only after confirming the launcher is present and
//! trusted. Every failure path leaves the launcher as the next boot target.
//!
//! # Example
//!
//! ```no_run
//! use fwstage::prelude::*;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let device = SimulatedDevice::open("/tmp/fwstage-device")?;
//! let store = FileKvStore::open("/tmp/fwstage-device/nvs.json")?;
//! let storage = LocalStorage::new("/media/sd");
//! let manager = StagingManager::new(StagingConfig::default(), device, store, storage);
//!
//! for candidate in manager.scan_firmware("firmware", 16) {
//!     println!("{} ({} bytes)", candidate.name, candidate.size);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod boot;
pub mod config;
pub mod decision;
pub mod error;
pub mod flash;
pub mod image;
pub mod manager;
pub mod operation;
pub mod prelude;
pub mod region;
pub mod runner;
pub mod scanner;
pub mod sim;
pub mod storage;

pub use boot::{BootOrchestrator, BootOutcome, BootState, BootTargetSelector};
pub use config::{ConfigError, StagingConfig};
pub use decision::{BootDecisionStore, FileKvStore, KvStore, MemoryKvStore};
pub use error::{
    BootError, FlashError, RunnerError, ScanError, SelectorError, StoreError, ValidationError,
};
pub use flash::{FlashDevice, FlashPhase, FlashReport, FlashWriter, WriteTransaction};
pub use image::{ImageFormat, ImageHeader, ImageMeta, ImageValidator};
pub use manager::{RegionStatus, StagingManager, StagingStatus};
pub use operation::FlashOperation;
pub use region::{FirmwareRegion, RegionKind, RegionTrustState};
pub use runner::{FlashHandle, FlashTaskRunner, ProgressEvent};
pub use scanner::{FirmwareImageCandidate, StorageScanner};
pub use sim::SimulatedDevice;
pub use storage::{LocalStorage, Storage};

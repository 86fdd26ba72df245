//! Command implementations for fwstagectl

pub mod boot;
pub mod device;
pub mod flash;
pub mod image;

use anyhow::{Context as _, Result};
use fwstage::BootOutcome;
use fwstage::sim::OTADATA_FILE;
use fwstage::{FileKvStore, LocalStorage, SimulatedDevice, StagingConfig, StagingManager};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CliError;

/// Boot decision store file inside the device directory
pub const DECISION_STORE_FILE: &str = "nvs.json";

/// Outcome of the boot decision since the last reset
pub const BOOT_RECORD_FILE: &str = "boot.json";

/// Manager type every command operates on
pub type Manager = StagingManager<SimulatedDevice, FileKvStore>;

/// Global options shared by all commands
#[derive(Debug, Clone)]
pub struct Context {
    pub device: PathBuf,
    pub storage: PathBuf,
    pub config: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// Staging configuration from `--config`, or defaults
    pub fn load_config(&self) -> Result<StagingConfig> {
        match &self.config {
            Some(path) => {
                debug!(path = %path.display(), "Loading staging configuration");
                Ok(StagingConfig::load(path).map_err(CliError::from)?)
            }
            None => Ok(StagingConfig::default()),
        }
    }

    /// Whether a simulated device exists at `--device`
    pub fn device_exists(&self) -> bool {
        self.device.join(OTADATA_FILE).is_file()
    }

    /// Open the device and build a manager over it
    pub fn open_manager(&self) -> Result<Manager> {
        let config = self.load_config()?;
        let device = self.open_device()?;
        let store = FileKvStore::open(decision_store_path(&self.device))
            .map_err(CliError::from)
            .context("Failed to open boot decision store")?;

        Ok(StagingManager::new(
            config,
            device,
            store,
            LocalStorage::new(&self.storage),
        ))
    }

    /// Open the simulated device without the rest of the stack
    pub fn open_device(&self) -> Result<SimulatedDevice> {
        if !self.device_exists() {
            return Err(CliError::DeviceNotFound(self.device.clone()).into());
        }
        Ok(SimulatedDevice::open(&self.device).map_err(CliError::from)?)
    }
}

/// Boot decision already taken since the last reset, if any
pub fn read_boot_record(device: &Path) -> Result<Option<BootOutcome>> {
    let path = device.join(BOOT_RECORD_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content).with_context(|| {
            format!("Corrupt boot record {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CliError::from(e).into()),
    }
}

/// Remember the boot decision until the next reset
pub fn write_boot_record(device: &Path, outcome: &BootOutcome) -> Result<()> {
    let data = serde_json::to_vec_pretty(outcome)?;
    std::fs::write(device.join(BOOT_RECORD_FILE), data).map_err(CliError::from)?;
    Ok(())
}

/// Forget the boot decision; a reset starts the device afresh
pub fn clear_boot_record(device: &Path) -> Result<()> {
    remove_if_present(&device.join(BOOT_RECORD_FILE))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CliError::from(e).into()),
    }
}

/// Remove state left behind by a previous device in the same directory
pub fn clear_device_state(device: &Path) -> Result<()> {
    remove_if_present(&decision_store_path(device))?;
    clear_boot_record(device)
}

fn decision_store_path(device: &Path) -> PathBuf {
    device.join(DECISION_STORE_FILE)
}

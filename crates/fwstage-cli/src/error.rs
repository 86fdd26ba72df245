//! Error types for fwstagectl CLI

use fwstage::{
    BootError, ConfigError, FlashError, RegionKind, RunnerError, SelectorError, StoreError,
    ValidationError,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No simulated device at {}; run `fwstagectl init` first", .0.display())]
    DeviceNotFound(PathBuf),

    #[error("Device already initialized at {}; pass --force to replace it", .0.display())]
    DeviceExists(PathBuf),

    #[error("The {0} region is running; the boot decision runs when the launcher starts")]
    LauncherNotRunning(RegionKind),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error(transparent)]
    Runner(RunnerError),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] SelectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<RunnerError> for CliError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::Flash(FlashError::Validation(e)) => CliError::Validation(e),
            RunnerError::Flash(e) => CliError::Flash(e),
            other => CliError::Runner(other),
        }
    }
}

impl CliError {
    /// Short machine-readable category for JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::DeviceNotFound(_) => "device_not_found",
            CliError::DeviceExists(_) => "device_exists",
            CliError::LauncherNotRunning(_) => "launcher_not_running",
            CliError::Validation(_) => "validation",
            CliError::Flash(_) | CliError::Runner(_) => "flash",
            CliError::Boot(_) => "boot",
            CliError::Config(_) => "config",
            CliError::Device(_) => "device",
            CliError::Store(_) => "store",
            CliError::IoError(_) => "io",
        }
    }
}

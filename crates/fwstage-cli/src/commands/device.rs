//! Device lifecycle commands

use anyhow::{Context as _, Result};
use fwstage::SimulatedDevice;
use std::path::Path;
use tracing::info;

use crate::commands::{Context, clear_boot_record, clear_device_state};
use crate::error::CliError;
use crate::output;

/// Create a simulated device with `launcher` installed
pub fn init(ctx: &Context, launcher: &Path, staging_capacity: u64, force: bool) -> Result<()> {
    if ctx.device_exists() && !force {
        return Err(CliError::DeviceExists(ctx.device.clone()).into());
    }

    let config = ctx.load_config()?;
    let image = std::fs::read(launcher)
        .map_err(CliError::from)
        .with_context(|| format!("Failed to read launcher image {}", launcher.display()))?;
    config.image.check_magic(&image).map_err(CliError::from)?;

    clear_device_state(&ctx.device)?;
    SimulatedDevice::init(&ctx.device, &image, staging_capacity).map_err(CliError::from)?;
    info!(
        device = %ctx.device.display(),
        launcher = %launcher.display(),
        staging_capacity,
        "Device initialized"
    );

    let manager = ctx.open_manager()?;
    output::print_status(&manager.status(), ctx.json);
    Ok(())
}

/// Simulate a hardware reset
pub fn reset(ctx: &Context) -> Result<()> {
    let mut device = ctx.open_device()?;
    let running = device.reset().map_err(CliError::from)?;
    clear_boot_record(&ctx.device)?;

    output::print_reset(running, ctx.json);
    Ok(())
}

/// Show subsystem status
pub fn status(ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;
    output::print_status(&manager.status(), ctx.json);
    Ok(())
}

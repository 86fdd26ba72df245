//! Image discovery and validation commands

use anyhow::Result;
use fwstage::{LocalStorage, StorageScanner};
use std::path::Path;

use crate::commands::Context;
use crate::error::CliError;
use crate::output;

/// List candidate images. Works without a device.
pub fn scan(ctx: &Context, dir: Option<&Path>, max: Option<usize>) -> Result<()> {
    let config = ctx.load_config()?;
    let dir = dir.unwrap_or(config.firmware_dir.as_path());
    let max = max.unwrap_or(config.max_scan_results);

    let storage = LocalStorage::new(&ctx.storage);
    let candidates =
        StorageScanner::new(config.image.clone()).scan(&storage, dir, max, config.include_hidden);

    output::print_candidates(dir, &candidates, ctx.json);
    Ok(())
}

/// Validate an image against the device's staging region
pub fn validate(ctx: &Context, image: &Path) -> Result<()> {
    let manager = ctx.open_manager()?;
    let meta = manager.validate(image).map_err(CliError::from)?;

    output::print_image_meta(&meta, ctx.json);
    Ok(())
}

//! Boot decision commands

use anyhow::Result;
use fwstage::RegionKind;
use tracing::debug;

use crate::commands::{Context, read_boot_record, write_boot_record};
use crate::error::CliError;
use crate::output;

/// Arm a one-shot boot of the staged image
pub fn run_once(ctx: &Context) -> Result<()> {
    let mut manager = ctx.open_manager()?;
    manager.request_run_once().map_err(CliError::from)?;

    output::print_run_once(ctx.json);
    Ok(())
}

/// Run the launcher's startup boot decision.
///
/// The decision acts once per device start; repeated calls before the next
/// reset report the recorded outcome, including the fail-closed outcome of
/// a refused one-shot.
pub fn boot(ctx: &Context) -> Result<()> {
    let mut manager = ctx.open_manager()?;

    let running = manager.device().lock().running();
    if running != RegionKind::Launcher {
        return Err(CliError::LauncherNotRunning(running).into());
    }

    if let Some(outcome) = read_boot_record(&ctx.device)? {
        debug!("Boot decision already taken since last reset");
        output::print_boot_outcome(&outcome, ctx.json);
        return Ok(());
    }

    let result = manager.boot();
    if let Some(recorded) = manager.boot_outcome() {
        write_boot_record(&ctx.device, &recorded)?;
    }
    let outcome = result.map_err(CliError::from)?;

    output::print_boot_outcome(&outcome, ctx.json);
    Ok(())
}

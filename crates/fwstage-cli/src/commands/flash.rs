//! Flash command

use anyhow::Result;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::commands::Context;
use crate::error::CliError;
use crate::output;

/// Stream `image` into the staging region on the background worker
pub fn execute(ctx: &Context, image: &Path) -> Result<()> {
    let manager = ctx.open_manager()?;
    let handle = manager.start_flash(image).map_err(CliError::from)?;

    let pb = if ctx.json {
        None
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")?
                .progress_chars("█▓░"),
        );
        pb.set_message(format!("Flashing {}", image.display()));
        Some(pb)
    };

    while let Some(event) = handle.recv_progress() {
        if let Some(pb) = &pb {
            pb.set_length(event.total);
            pb.set_position(event.bytes_written);
            pb.set_message(event.phase.to_string());
        }
    }

    match handle.join() {
        Ok(report) => {
            if let Some(pb) = pb {
                pb.finish_with_message(format!("{} Flash complete", "✓".green()));
            }
            output::print_flash_report(image, &report, ctx.json);
            Ok(())
        }
        Err(e) => {
            if let Some(pb) = pb {
                pb.abandon_with_message(format!("{} Flash failed", "✗".red()));
            }
            Err(CliError::from(e).into())
        }
    }
}

//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use fwstage::{
    BootOutcome, BootState, FirmwareImageCandidate, FlashOperation, FlashReport, ImageMeta,
    RegionKind, RegionStatus, RegionTrustState, StagingStatus,
};
use serde_json::{Value, json};
use std::path::Path;

use crate::error::CliError;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    print_json(&error_json);
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    // Print error chain if available
    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    error.downcast_ref::<CliError>().map_or("error", CliError::kind)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Print scan results
pub fn print_candidates(dir: &Path, candidates: &[FirmwareImageCandidate], json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "directory": dir,
            "images": candidates
        }));
        return;
    }

    if candidates.is_empty() {
        println!(
            "{}",
            format!("No firmware images found in {}", dir.display()).yellow()
        );
        return;
    }

    println!("{}", format!("Firmware images in {}:", dir.display()).bold());
    for candidate in candidates {
        println!(
            "  {} {} ({})",
            "●".cyan(),
            candidate.name.bold(),
            format_size(candidate.size).dimmed()
        );
    }
}

/// Print a successful validation
pub fn print_image_meta(meta: &ImageMeta, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "image": meta
        }));
        return;
    }

    println!(
        "{} {} is a valid image ({})",
        "✓".green(),
        meta.path.display().to_string().bold(),
        format_size(meta.size)
    );
    if let Some(header) = &meta.header {
        println!("  Segments:    {}", header.segment_count);
        println!("  Entry:       {:#010x}", header.entry_addr);
        println!("  Chip ID:     {:#06x}", header.chip_id);
    }
}

/// Print a completed flash
pub fn print_flash_report(image: &Path, report: &FlashReport, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "image": image,
            "report": report
        }));
        return;
    }

    println!(
        "{} Staged {} into {} region ({})",
        "✓".green(),
        image.display().to_string().bold(),
        report.region,
        format_size(report.bytes_written)
    );
    println!("  SHA256: {}", report.sha256.dimmed());
}

/// Print the result of arming a one-shot boot
pub fn print_run_once(json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "run_once_requested": true
        }));
        return;
    }

    println!("{} Staged image will boot once on the next start", "✓".green());
}

/// Print the startup boot decision
pub fn print_boot_outcome(outcome: &BootOutcome, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "outcome": outcome,
            "restart_required": outcome.restart_required()
        }));
        return;
    }

    match outcome.state {
        BootState::AwaitingManualRestart => {
            println!("{} Staged image armed for one boot", "●".yellow());
            println!("  Restart the device to run it (fwstagectl reset)");
        }
        BootState::Confirmed | BootState::Idle => {
            println!("{} Launcher confirmed as boot target", "✓".green());
        }
    }
    println!("  Next boot: {}", outcome.next_boot.to_string().bold());
}

/// Print which region the bootloader started
pub fn print_reset(running: RegionKind, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "running": running
        }));
        return;
    }

    let label = match running {
        RegionKind::Launcher => running.to_string().green(),
        RegionKind::Staging => running.to_string().yellow(),
    };
    println!("{} Device reset, running {}", "↻".cyan(), label.bold());
}

/// Print subsystem status
pub fn print_status(status: &StagingStatus, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "status": status
        }));
        return;
    }

    println!("{}", "Regions:".bold());
    print_region("Launcher", status.launcher.as_ref());
    print_region("Staging", status.staging.as_ref());

    let next_boot = status
        .next_boot
        .map_or_else(|| "unknown".red(), |k| k.to_string().normal());
    println!("  Next boot:        {next_boot}");
    println!("  Run once pending: {}", yes_no(status.run_once_requested));
    println!("  Firmware staged:  {}", yes_no(status.firmware_staged));

    if let Some(op) = &status.flash {
        print_operation(op);
    }
}

fn print_region(name: &str, region: Option<&RegionStatus>) {
    let Some(region) = region else {
        println!("  {} {:<9} {}", "●".red(), name, "missing".red());
        return;
    };

    let trust = match region.trust {
        Some(trust) => trust_colored(trust),
        None => "unknown".dimmed(),
    };
    println!(
        "  {} {:<9} {} @ {:#010x}  {:>10}  {}",
        "●".color(trust_color(region.trust)),
        name,
        region.region.label.bold(),
        region.region.base_address,
        format_size(region.region.capacity),
        trust
    );
}

fn print_operation(op: &FlashOperation) {
    println!("{}", "Last flash:".bold());
    println!("  Image:    {}", op.image.display());
    println!(
        "  Progress: {}% ({} / {})",
        op.percent(),
        format_size(op.bytes_written),
        format_size(op.total)
    );
    println!("  Phase:    {}", op.phase);
    if let Some(error) = &op.last_error {
        println!("  Error:    {}", error.red());
    }
}

fn trust_color(trust: Option<RegionTrustState>) -> &'static str {
    match trust {
        Some(RegionTrustState::Valid) => "green",
        Some(RegionTrustState::New | RegionTrustState::PendingVerify) => "yellow",
        Some(RegionTrustState::Invalid | RegionTrustState::Aborted) | None => "red",
    }
}

fn trust_colored(trust: RegionTrustState) -> ColoredString {
    trust.to_string().color(trust_color(Some(trust)))
}

fn yes_no(value: bool) -> ColoredString {
    if value { "yes".green() } else { "no".normal() }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes >= MIB && bytes.is_multiple_of(MIB) {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes.is_multiple_of(KIB) {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} bytes")
    }
}

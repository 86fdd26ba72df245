//! fwstagectl - Firmware Staging CLI
//!
//! Drives a simulated dual-region device: stage images from removable
//! storage, arm a one-shot boot, and walk through resets to observe the
//! bootloader's rollback behavior.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]

mod commands;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Context;
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "fwstagectl")]
#[command(about = "Firmware Staging CLI - Stage, flash and boot-test firmware images")]
#[command(version)]
#[command(long_about = "
fwstagectl is the Firmware Staging CLI. It stages firmware images from
removable storage into the staging region of a device and arms a single
trial boot of the staged image. The
launcher region stays untouched, so a device that resets without the staged
image confirming itself falls back to the launcher.

The device is simulated as a directory; create one with `fwstagectl init`.
Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Simulated device directory
    #[arg(
        long,
        global = true,
        env = "FWSTAGE_DEVICE",
        default_value = "fwstage-device"
    )]
    device: PathBuf,

    /// Root of the removable storage that holds firmware images
    #[arg(long, global = true, env = "FWSTAGE_STORAGE", default_value = ".")]
    storage: PathBuf,

    /// Staging configuration file (JSON)
    #[arg(long, global = true, env = "FWSTAGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a simulated device with a launcher image installed
    Init {
        /// Launcher image to install
        launcher: PathBuf,

        /// Staging region capacity in bytes
        #[arg(
            long,
            default_value_t = 4 * 1024 * 1024,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        staging_capacity: u64,

        /// Replace an existing device
        #[arg(long)]
        force: bool,
    },

    /// List firmware images on removable storage
    Scan {
        /// Directory to scan (defaults to the configured firmware directory)
        dir: Option<PathBuf>,

        /// Maximum number of results
        #[arg(short, long)]
        max: Option<usize>,
    },

    /// Check an image against the staging region without writing it
    Validate {
        /// Image path, relative to the storage root
        image: PathBuf,
    },

    /// Write an image into the staging region
    Flash {
        /// Image path, relative to the storage root
        image: PathBuf,
    },

    /// Boot the staged image once on the next start
    RunOnce,

    /// Run the startup boot decision as the launcher does on power-up
    Boot,

    /// Simulate a hardware reset
    Reset,

    /// Show region, boot target and flash state
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fwstagectl={log_level},fwstage={log_level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match execute_command(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let exit_code = match e.downcast_ref::<CliError>() {
                Some(CliError::Validation(_)) => 2,
                Some(CliError::Flash(_) | CliError::Runner(_)) => 3,
                Some(CliError::Boot(_)) => 4,
                Some(CliError::Config(_)) => 5,
                _ => 1,
            };
            ExitCode::from(exit_code)
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    let ctx = Context {
        device: cli.device.clone(),
        storage: cli.storage.clone(),
        config: cli.config.clone(),
        json: cli.json,
    };

    match &cli.command {
        Commands::Init {
            launcher,
            staging_capacity,
            force,
        } => commands::device::init(&ctx, launcher, *staging_capacity, *force),
        Commands::Scan { dir, max } => commands::image::scan(&ctx, dir.as_deref(), *max),
        Commands::Validate { image } => commands::image::validate(&ctx, image),
        Commands::Flash { image } => commands::flash::execute(&ctx, image),
        Commands::RunOnce => commands::boot::run_once(&ctx),
        Commands::Boot => commands::boot::boot(&ctx),
        Commands::Reset => commands::device::reset(&ctx),
        Commands::Status => commands::device::status(&ctx),
    }
}

//! osxpve CLI - Main Entry Point
//!
//! Provisions macOS guests on Proxmox VE: host preflight, asset download,
//! install planning, and plan application with snapshot/rollback.

use clap::{Parser, Subcommand};
use osxpve_core::ProxmoxAdapter;

mod commands;
mod output;

use commands::{apply, diag, download, internal, plan, uninstall};

/// osxpve - macOS guest provisioning for Proxmox VE
#[derive(Parser)]
#[command(name = "osxpve")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check host readiness for macOS guests
    Preflight,

    /// Export a support bundle of logs and snapshots
    Bundle,

    /// Print remediation hints for a failure
    Guide {
        /// Free-form failure description
        #[arg(default_value = "boot issue")]
        reason: String,
    },

    /// Download OpenCore and macOS recovery/installer images
    Download(download::DownloadArgs),

    /// Show the install plan for a VM
    Plan(plan::PlanArgs),

    /// Apply the install plan (dry-run unless --execute)
    Apply(apply::ApplyArgs),

    /// Destroy an existing macOS VM
    Uninstall(uninstall::UninstallArgs),

    /// Patch a mounted OpenCore config.plist (used by generated scripts)
    #[command(hide = true, name = "plist-patch")]
    PlistPatch(internal::PlistPatchArgs),

    /// Fix HFS+ volume flags on a recovery image (used by generated scripts)
    #[command(hide = true, name = "hfs-fix")]
    HfsFix(internal::HfsFixArgs),
}

fn dispatch(command: Commands) -> anyhow::Result<i32> {
    let runner = ProxmoxAdapter::new();
    match command {
        Commands::Preflight => diag::preflight(),
        Commands::Bundle => diag::bundle(),
        Commands::Guide { reason } => diag::guide(&reason),
        Commands::Download(args) => download::execute(args, &runner),
        Commands::Plan(args) => plan::execute(args, &runner),
        Commands::Apply(args) => apply::execute(args, &runner),
        Commands::Uninstall(args) => uninstall::execute(args, &runner),
        Commands::PlistPatch(args) => internal::plist_patch(args),
        Commands::HfsFix(args) => internal::hfs_fix(args),
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

//! `download` - fetch OpenCore and macOS recovery/installer images

use crate::output;
use colored::Colorize;
use osxpve_common::{release_info, ReleaseChannel, DEFAULT_ISO_DIR};
use osxpve_core::adapter::CommandRunner;
use osxpve_core::download as downloader;
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    /// macOS release (ventura, sonoma, sequoia, tahoe)
    #[arg(long)]
    pub macos: String,

    /// Destination directory
    #[arg(long, default_value = DEFAULT_ISO_DIR)]
    pub dest: PathBuf,

    /// Only download the OpenCore image
    #[arg(long, conflicts_with = "recovery_only")]
    pub opencore_only: bool,

    /// Only download the recovery image
    #[arg(long)]
    pub recovery_only: bool,
}

pub fn execute(args: DownloadArgs, runner: &dyn CommandRunner) -> anyhow::Result<i32> {
    let Some(release) = release_info(&args.macos) else {
        eprintln!(
            "{} unsupported macOS release '{}' (expected: {})",
            "ERROR:".red(),
            args.macos,
            osxpve_common::supported_release_names()
        );
        return Ok(2);
    };
    std::fs::create_dir_all(&args.dest)?;
    let mut ok = true;

    if !args.recovery_only {
        println!("Downloading OpenCore image for {}...", args.macos);
        let (bar, on_progress) = output::download_bar("opencore");
        match downloader::download_opencore(&args.macos, &args.dest, Some(&on_progress)) {
            Ok(path) => {
                bar.finish_and_clear();
                println!("Downloaded: {}", path.display());
            }
            Err(err) => {
                bar.finish_and_clear();
                eprintln!("{} {}", "OpenCore download failed:".red(), err);
                ok = false;
            }
        }
    }

    if !args.opencore_only {
        // The preview release installs from a full installer; an explicit
        // --recovery-only still fetches its recovery image via osrecovery.
        if release.channel == ReleaseChannel::Preview && !args.recovery_only {
            println!("Downloading full installer for {}...", args.macos);
            let (bar, on_progress) = output::download_bar("installer");
            match downloader::download_full_installer(&args.macos, &args.dest, runner, Some(&on_progress))
            {
                Ok(path) => {
                    bar.finish_and_clear();
                    println!("Downloaded: {}", path.display());
                }
                Err(err) => {
                    bar.finish_and_clear();
                    eprintln!("{} {}", "Installer download failed:".red(), err);
                    ok = false;
                }
            }
        } else {
            println!("Downloading recovery image for {}...", args.macos);
            let (bar, on_progress) = output::download_bar("recovery");
            match downloader::download_recovery(&args.macos, &args.dest, runner, Some(&on_progress)) {
                Ok(path) => {
                    bar.finish_and_clear();
                    println!("Downloaded: {}", path.display());
                }
                Err(err) => {
                    bar.finish_and_clear();
                    eprintln!("{} {}", "Recovery download failed:".red(), err);
                    ok = false;
                }
            }
        }
    }

    Ok(if ok { 0 } else { 5 })
}

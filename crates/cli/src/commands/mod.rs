//! CLI command implementations

pub mod apply;
pub mod diag;
pub mod download;
pub mod internal;
pub mod plan;
pub mod uninstall;

use crate::output;
use colored::Colorize;
use osxpve_common::{validate_config, VmConfig, DEFAULT_BRIDGE, DEFAULT_STORAGE};
use osxpve_core::adapter::CommandRunner;
use osxpve_core::{assets, download as downloader, probes};
use std::path::PathBuf;

/// VM flags shared by `plan` and `apply`, mirroring VmConfig.
#[derive(clap::Args, Debug, Clone)]
pub struct VmFlags {
    /// VM ID (default: next free VMID)
    #[arg(long)]
    pub vmid: Option<u32>,

    /// VM name
    #[arg(long)]
    pub name: String,

    /// macOS release (ventura, sonoma, sequoia, tahoe)
    #[arg(long)]
    pub macos: String,

    /// CPU cores (default: host-derived power of two)
    #[arg(long)]
    pub cores: Option<u32>,

    /// Memory in MB (default: half of host RAM, clamped)
    #[arg(long)]
    pub memory: Option<u64>,

    /// Disk size in GB (default: per-release minimum)
    #[arg(long)]
    pub disk: Option<u64>,

    /// Network bridge
    #[arg(long, default_value = DEFAULT_BRIDGE)]
    pub bridge: String,

    /// Storage target for VM disks
    #[arg(long, default_value = DEFAULT_STORAGE)]
    pub storage: String,

    /// Explicit installer/recovery image path
    #[arg(long, default_value = "")]
    pub installer_path: String,

    /// SMBIOS serial (12 chars, generated when empty)
    #[arg(long, default_value = "")]
    pub smbios_serial: String,

    /// SMBIOS UUID (generated when empty)
    #[arg(long, default_value = "")]
    pub smbios_uuid: String,

    /// SMBIOS MLB (17 chars, generated when empty)
    #[arg(long, default_value = "")]
    pub smbios_mlb: String,

    /// SMBIOS ROM (12 hex chars, generated when empty)
    #[arg(long, default_value = "")]
    pub smbios_rom: String,

    /// SMBIOS model (e.g. iMacPro1,1)
    #[arg(long, default_value = "")]
    pub smbios_model: String,

    /// Skip the SMBIOS identity step entirely
    #[arg(long)]
    pub no_smbios: bool,

    /// Configure for Apple services (iMessage, FaceTime, iCloud):
    /// checksummed identity, vmgenid, static MAC
    #[arg(long)]
    pub apple_services: bool,

    /// Skip auto-download of missing assets
    #[arg(long)]
    pub no_download: bool,

    /// Verbose kernel log instead of the Apple logo during boot
    #[arg(long)]
    pub verbose_boot: bool,

    /// Directory for ISO/recovery images (default: auto-detect)
    #[arg(long, default_value = "")]
    pub iso_dir: String,

    /// Override the QEMU CPU model (e.g. Skylake-Server-IBRS)
    #[arg(long, default_value = "")]
    pub cpu_model: String,
}

impl VmFlags {
    /// Resolve the flags into a full config, probing the host for any
    /// omitted defaults.
    pub fn into_config(self, runner: &dyn CommandRunner) -> VmConfig {
        let mut config = VmConfig::new(
            self.vmid.unwrap_or_else(|| probes::next_vmid(runner)),
            self.name,
            self.macos.clone(),
            self.cores.unwrap_or_else(probes::detect_cpu_cores),
            self.memory.unwrap_or_else(probes::detect_memory_mb),
            self.disk.unwrap_or_else(|| probes::default_disk_gb(&self.macos)),
            self.bridge,
            self.storage,
        );
        config.installer_path = self.installer_path;
        config.smbios_serial = self.smbios_serial;
        config.smbios_uuid = self.smbios_uuid;
        config.smbios_mlb = self.smbios_mlb;
        config.smbios_rom = self.smbios_rom;
        config.smbios_model = self.smbios_model;
        config.no_smbios = self.no_smbios;
        config.apple_services = self.apple_services;
        config.verbose_boot = self.verbose_boot;
        config.iso_dir = self.iso_dir;
        config.cpu_model = self.cpu_model;
        config
    }
}

/// Outcome of the shared plan preamble.
pub enum PlanOutcome {
    /// Front-end should exit with this code.
    Exit(i32),
    /// Config validated, assets staged, plan built.
    Ready {
        config: VmConfig,
        steps: Vec<osxpve_common::PlanStep>,
    },
}

/// Shared preamble for `plan` and `apply`: validate, stage assets,
/// report the CPU strategy, and build the plan.
pub fn resolve_and_plan(flags: VmFlags, runner: &dyn CommandRunner) -> anyhow::Result<PlanOutcome> {
    let no_download = flags.no_download;
    let mut config = flags.into_config(runner);

    let issues = validate_config(&config);
    if !issues.is_empty() {
        for issue in issues {
            eprintln!("{} {}", "ERROR:".red(), issue);
        }
        return Ok(PlanOutcome::Exit(2));
    }

    let mut missing: Vec<_> = assets::required_assets(&config)
        .into_iter()
        .filter(|a| !a.present)
        .collect();

    if !missing.is_empty() && !no_download {
        let dest_dir = download_dir(&config, runner);
        for asset in missing.iter().filter(|a| a.downloadable) {
            if let Err(err) = fetch_asset(&config, &asset.name, &dest_dir, runner) {
                eprintln!("{} {}", "Download failed:".red(), err);
            }
        }
        missing = assets::required_assets(&config)
            .into_iter()
            .filter(|a| !a.present)
            .collect();
    }

    if !missing.is_empty() {
        for item in &missing {
            eprintln!("{} {}: {}", "MISSING:".red(), item.name, item.path.display());
        }
        for hint in assets::suggested_fetch_commands(&config) {
            println!("{hint}");
        }
        return Ok(PlanOutcome::Exit(3));
    }

    let cpu = probes::detect_cpu_info();
    let cpu_mode = if !config.cpu_model.is_empty() {
        format!("override: {}", config.cpu_model)
    } else if cpu.needs_emulated_cpu {
        "Cascadelake-Server emulation".to_string()
    } else {
        "native host passthrough".to_string()
    };
    let cpu_label = if cpu.model_name.is_empty() {
        cpu.vendor.to_string()
    } else {
        cpu.model_name.clone()
    };
    println!("CPU: {cpu_label} ({cpu_mode})");

    osxpve_core::ensure_identity(&mut config);
    let steps = osxpve_core::build_plan(&config, &cpu, runner)?;
    Ok(PlanOutcome::Ready { config, steps })
}

/// Where auto-downloaded assets land: explicit override, else the first
/// detected ISO storage directory.
pub fn download_dir(config: &VmConfig, runner: &dyn CommandRunner) -> PathBuf {
    if !config.iso_dir.is_empty() {
        return PathBuf::from(&config.iso_dir);
    }
    probes::detect_iso_storage(runner)
        .into_iter()
        .next()
        .expect("iso storage list always has a head entry")
}

fn fetch_asset(
    config: &VmConfig,
    asset_name: &str,
    dest_dir: &std::path::Path,
    runner: &dyn CommandRunner,
) -> osxpve_common::Result<PathBuf> {
    if asset_name.contains("OpenCore") {
        println!("Downloading OpenCore image for {}...", config.macos);
        let (bar, on_progress) = output::download_bar("opencore");
        let path = downloader::download_opencore(&config.macos, dest_dir, Some(&on_progress))?;
        bar.finish_and_clear();
        println!("Downloaded: {}", path.display());
        return Ok(path);
    }

    let preview = osxpve_common::release_info(&config.macos)
        .map(|r| r.channel == osxpve_common::ReleaseChannel::Preview)
        .unwrap_or(false);
    if preview {
        println!("Downloading full installer for {}...", config.macos);
        let (bar, on_progress) = output::download_bar("installer");
        let path =
            downloader::download_full_installer(&config.macos, dest_dir, runner, Some(&on_progress))?;
        bar.finish_and_clear();
        println!("Downloaded: {}", path.display());
        Ok(path)
    } else {
        println!("Downloading recovery image for {}...", config.macos);
        let (bar, on_progress) = output::download_bar("recovery");
        let path = downloader::download_recovery(&config.macos, dest_dir, runner, Some(&on_progress))?;
        bar.finish_and_clear();
        println!("Downloaded: {}", path.display());
        Ok(path)
    }
}

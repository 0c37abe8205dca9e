//! VM configuration validation
//!
//! Every field of `VmConfig` that is later interpolated into a shell
//! command must pass a strict regex here. The planner and executor assume
//! a validated config but still reject an invalid one defensively.

use crate::types::{release_info, supported_release_names, VmConfig};
use once_cell::sync::Lazy;
use regex::Regex;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$").unwrap());
static BRIDGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^vmbr[0-9]+$").unwrap());
static STORAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());
static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9/._\-]+$").unwrap());
static SERIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{12}$").unwrap());
static MLB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{17}$").unwrap());
static ROM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-F0-9]{12}$").unwrap());
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-F]{8}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{4}-[0-9A-F]{12}$").unwrap()
});
static MODEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9,]{1,20}$").unwrap());
static MAC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9A-F]{2}:){5}[0-9A-F]{2}$").unwrap());
static CPU_MODEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-]+$").unwrap());

/// Validate a VM configuration.
///
/// Returns an ordered list of human-readable issues; empty means valid.
/// The same input always yields the same issue list.
pub fn validate_config(config: &VmConfig) -> Vec<String> {
    let mut issues = Vec::new();

    if config.vmid < 100 || config.vmid > 999_999 {
        issues.push("VMID must be between 100 and 999999.".to_string());
    }
    if config.name.len() < 3 {
        issues.push("VM name must be at least 3 characters.".to_string());
    } else if !NAME_RE.is_match(&config.name) {
        issues.push(
            "VM name must start with alphanumeric and contain only [A-Za-z0-9.-].".to_string(),
        );
    }
    if release_info(&config.macos).is_none() {
        issues.push(format!(
            "macOS version must be one of: {}.",
            supported_release_names()
        ));
    }
    if config.cores < 2 {
        issues.push("At least 2 CPU cores are required.".to_string());
    } else if !config.cores.is_power_of_two() {
        issues.push("CPU cores must be a power of two (macOS hangs on odd topologies).".to_string());
    }
    if config.memory_mb < 4096 {
        issues.push("At least 4096 MB RAM is required.".to_string());
    }
    if config.disk_gb < 64 {
        issues.push("At least 64 GB disk is required.".to_string());
    }
    if !BRIDGE_RE.is_match(&config.bridge) {
        issues.push("Bridge must match vmbr<N> (e.g. vmbr0).".to_string());
    }
    if config.storage.is_empty() {
        issues.push("Storage target is required.".to_string());
    } else if !STORAGE_RE.is_match(&config.storage) {
        issues.push("Storage target must be alphanumeric, hyphens, underscores only.".to_string());
    }
    if !config.installer_path.is_empty() && !PATH_RE.is_match(&config.installer_path) {
        issues.push("Installer path contains invalid characters.".to_string());
    }
    if !config.iso_dir.is_empty() && !PATH_RE.is_match(&config.iso_dir) {
        issues.push("ISO directory contains invalid characters.".to_string());
    }
    if !config.smbios_serial.is_empty() && !SERIAL_RE.is_match(&config.smbios_serial) {
        issues.push("SMBIOS serial must be exactly 12 chars [A-Z0-9].".to_string());
    }
    if !config.smbios_mlb.is_empty() && !MLB_RE.is_match(&config.smbios_mlb) {
        issues.push("SMBIOS MLB must be exactly 17 chars [A-Z0-9].".to_string());
    }
    if !config.smbios_rom.is_empty() && !ROM_RE.is_match(&config.smbios_rom) {
        issues.push("SMBIOS ROM must be exactly 12 hex chars [A-F0-9].".to_string());
    }
    if !config.smbios_uuid.is_empty() && !UUID_RE.is_match(&config.smbios_uuid) {
        issues.push("SMBIOS UUID must be a valid uppercase UUID.".to_string());
    }
    if !config.smbios_model.is_empty() && !MODEL_RE.is_match(&config.smbios_model) {
        issues.push("SMBIOS model must be alphanumeric (e.g. MacPro7,1).".to_string());
    }
    if !config.static_mac.is_empty() && !MAC_RE.is_match(&config.static_mac) {
        issues.push("Static MAC must be XX:XX:XX:XX:XX:XX format (uppercase hex).".to_string());
    }
    if !config.vmgenid.is_empty() && !UUID_RE.is_match(&config.vmgenid) {
        issues.push("vmgenid must be a valid uppercase UUID.".to_string());
    }
    if !config.cpu_model.is_empty() && !CPU_MODEL_RE.is_match(&config.cpu_model) {
        issues.push(
            "CPU model must be alphanumeric/hyphens only (e.g. Skylake-Server-IBRS).".to_string(),
        );
    }

    issues
}

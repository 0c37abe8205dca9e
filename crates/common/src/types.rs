//! Core types shared across the osxpve workspace

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Release channel of a supported macOS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseChannel {
    Stable,
    Preview,
}

impl std::fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseChannel::Stable => write!(f, "stable"),
            ReleaseChannel::Preview => write!(f, "preview"),
        }
    }
}

/// Static metadata for one supported macOS release
#[derive(Debug, Clone, Copy)]
pub struct ReleaseInfo {
    pub name: &'static str,
    pub label: &'static str,
    pub major: u32,
    pub channel: ReleaseChannel,
}

/// The closed set of macOS releases this tool can provision.
pub const SUPPORTED_RELEASES: &[ReleaseInfo] = &[
    ReleaseInfo {
        name: "ventura",
        label: "macOS Ventura 13",
        major: 13,
        channel: ReleaseChannel::Stable,
    },
    ReleaseInfo {
        name: "sonoma",
        label: "macOS Sonoma 14",
        major: 14,
        channel: ReleaseChannel::Stable,
    },
    ReleaseInfo {
        name: "sequoia",
        label: "macOS Sequoia 15",
        major: 15,
        channel: ReleaseChannel::Stable,
    },
    ReleaseInfo {
        name: "tahoe",
        label: "macOS Tahoe 26",
        major: 26,
        channel: ReleaseChannel::Preview,
    },
];

/// Look up release metadata by its short name.
pub fn release_info(macos: &str) -> Option<&'static ReleaseInfo> {
    SUPPORTED_RELEASES.iter().find(|r| r.name == macos)
}

/// Comma-separated list of supported release names, for error messages.
pub fn supported_release_names() -> String {
    SUPPORTED_RELEASES
        .iter()
        .map(|r| r.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// User-supplied VM configuration
///
/// Every string field that ends up inside a shell command is validated by
/// `validate::validate_config` before any command is emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    pub vmid: u32,
    pub name: String,
    pub macos: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub bridge: String,
    pub storage: String,
    #[serde(default)]
    pub installer_path: String,
    #[serde(default)]
    pub smbios_serial: String,
    #[serde(default)]
    pub smbios_uuid: String,
    #[serde(default)]
    pub smbios_mlb: String,
    #[serde(default)]
    pub smbios_rom: String,
    #[serde(default)]
    pub smbios_model: String,
    #[serde(default)]
    pub no_smbios: bool,
    #[serde(default)]
    pub apple_services: bool,
    #[serde(default)]
    pub vmgenid: String,
    #[serde(default)]
    pub static_mac: String,
    #[serde(default)]
    pub verbose_boot: bool,
    #[serde(default)]
    pub iso_dir: String,
    #[serde(default)]
    pub cpu_model: String,
}

impl VmConfig {
    /// Build a config from the required fields; optional fields start
    /// empty/false and are filled by flags or identity generation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vmid: u32,
        name: impl Into<String>,
        macos: impl Into<String>,
        cores: u32,
        memory_mb: u64,
        disk_gb: u64,
        bridge: impl Into<String>,
        storage: impl Into<String>,
    ) -> Self {
        Self {
            vmid,
            name: name.into(),
            macos: macos.into(),
            cores,
            memory_mb,
            disk_gb,
            bridge: bridge.into(),
            storage: storage.into(),
            installer_path: String::new(),
            smbios_serial: String::new(),
            smbios_uuid: String::new(),
            smbios_mlb: String::new(),
            smbios_rom: String::new(),
            smbios_model: String::new(),
            no_smbios: false,
            apple_services: false,
            vmgenid: String::new(),
            static_mac: String::new(),
            verbose_boot: false,
            iso_dir: String::new(),
            cpu_model: String::new(),
        }
    }
}

/// How risky a plan step is to run on a live host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRisk {
    Safe,
    Warn,
    Action,
}

/// One shell invocation in an install or destroy plan
///
/// Built by the planner, consumed read-only by the executor; never mutated
/// after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub title: String,
    pub argv: Vec<String>,
    pub risk: StepRisk,
}

impl PlanStep {
    pub fn new(title: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            title: title.into(),
            argv,
            risk: StepRisk::Safe,
        }
    }

    pub fn with_risk(mut self, risk: StepRisk) -> Self {
        self.risk = risk;
        self
    }

    /// The rendered command line, shell-quoted where needed.
    pub fn command(&self) -> String {
        shell_join(&self.argv)
    }
}

/// Quote a single token for POSIX shells.
///
/// Tokens made of safe characters pass through untouched; anything else is
/// wrapped in single quotes with embedded quotes escaped.
pub fn shell_quote(token: &str) -> String {
    if !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c))
    {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', "'\"'\"'"))
}

/// Join an argv into a single shell-safe command line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Host CPU vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuVendor {
    Intel,
    Amd,
}

impl std::fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuVendor::Intel => write!(f, "Intel"),
            CpuVendor::Amd => write!(f, "AMD"),
        }
    }
}

/// Host CPU identity, derived once from /proc/cpuinfo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    pub vendor: CpuVendor,
    pub model_name: String,
    pub family: u32,
    pub model: u32,
    /// True when macOS needs a fully emulated CPU model instead of host
    /// passthrough (all AMD parts, hybrid Intel generations).
    pub needs_emulated_cpu: bool,
}

/// Generated or user-supplied SMBIOS identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmbiosIdentity {
    pub serial: String,
    pub mlb: String,
    pub uuid: String,
    pub rom: String,
    pub model: String,
    /// Present only in Apple-services mode; the ROM is derived from it.
    pub mac: Option<String>,
}

/// Presence check for one required disk image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetCheck {
    pub name: String,
    pub path: PathBuf,
    pub present: bool,
    pub hint: String,
    pub downloadable: bool,
}

/// Outcome of one external command invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub returncode: i32,
    pub output: String,
}

/// Result of applying one plan step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub title: String,
    pub command: String,
    pub ok: bool,
    pub returncode: i32,
    pub output: String,
}

/// Result of applying a whole plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub ok: bool,
    pub results: Vec<StepResult>,
    pub log_path: PathBuf,
}

/// Pointer at a dumped prior VM config, for rollback guidance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub vmid: u32,
    pub path: PathBuf,
}

/// One host readiness check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub ok: bool,
    pub details: String,
}

/// Aggregate preflight score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub score: usize,
    pub total: usize,
    pub summary: String,
}

/// Which artefact a download progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    OpenCore,
    Recovery,
    Installer,
}

impl std::fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadPhase::OpenCore => write!(f, "opencore"),
            DownloadPhase::Recovery => write!(f, "recovery"),
            DownloadPhase::Installer => write!(f, "installer"),
        }
    }
}

/// Streaming download progress; `total` is 0 when the size is unknown
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: u64,
    pub phase: DownloadPhase,
}

/// Summary of an existing VM, parsed from `qm status` / `qm config`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub vmid: u32,
    pub name: String,
    pub status: String,
    pub config_raw: String,
}

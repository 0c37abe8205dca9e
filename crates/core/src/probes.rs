//! Host probes
//!
//! Detect CPU identity, sensible core/memory/disk defaults, ISO storage
//! locations, and the next free VMID. Probes never fail hard: a missing
//! descriptor file falls back to a conservative default.

use crate::adapter::CommandRunner;
use osxpve_common::{CpuInfo, CpuVendor, DEFAULT_ISO_DIR};
use std::path::PathBuf;
use tracing::debug;

/// Intel Family 6 hybrid (P+E core) models: Alder Lake, Raptor Lake,
/// Meteor Lake. These hang under host passthrough; macOS needs an
/// emulated CPU model instead.
const HYBRID_INTEL_MODELS: &[u32] = &[151, 154, 170, 172, 183, 186];

/// Models at or above this are assumed hybrid until proven otherwise.
const HYBRID_INTEL_MODEL_THRESHOLD: u32 = 190;

/// Parse the first processor block of a /proc/cpuinfo dump.
pub fn parse_cpu_info(cpuinfo: &str) -> CpuInfo {
    let mut vendor = CpuVendor::Intel;
    let mut model_name = String::new();
    let mut family = 0u32;
    let mut model = 0u32;
    let mut seen_any = false;

    for line in cpuinfo.lines() {
        // Only the first processor block matters.
        if line.trim().is_empty() && seen_any {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        seen_any = true;
        let key = key.trim();
        let value = value.trim();
        match key {
            "vendor_id" => {
                if value.contains("AuthenticAMD") {
                    vendor = CpuVendor::Amd;
                }
            }
            "model name" => model_name = value.to_string(),
            "cpu family" => family = value.parse().unwrap_or(0),
            "model" => model = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let hybrid_intel = vendor == CpuVendor::Intel
        && family == 6
        && (HYBRID_INTEL_MODELS.contains(&model) || model >= HYBRID_INTEL_MODEL_THRESHOLD);

    CpuInfo {
        vendor,
        model_name,
        family,
        model,
        needs_emulated_cpu: vendor == CpuVendor::Amd || hybrid_intel,
    }
}

/// Detect the host CPU from /proc/cpuinfo.
///
/// A missing or unreadable descriptor defaults to Intel with host
/// passthrough.
pub fn detect_cpu_info() -> CpuInfo {
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(text) => parse_cpu_info(&text),
        Err(_) => CpuInfo {
            vendor: CpuVendor::Intel,
            model_name: String::new(),
            family: 0,
            model: 0,
            needs_emulated_cpu: false,
        },
    }
}

fn round_down_power_of_two(n: u32) -> u32 {
    let mut p = 1;
    while p * 2 <= n {
        p *= 2;
    }
    p.max(2)
}

/// Default guest core count for a host with `host_cores` logical cores.
///
/// Half the host (whole host below 8 cores), clamped to [2, 16], rounded
/// down to a power of two. macOS can hang at the Apple logo on odd
/// topologies, so the result is always a power of two.
pub fn default_cores_for(host_cores: u32) -> u32 {
    let half = if host_cores >= 8 {
        host_cores / 2
    } else {
        host_cores
    };
    round_down_power_of_two(half.clamp(2, 16))
}

/// Default guest core count for this host.
pub fn detect_cpu_cores() -> u32 {
    let count = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4);
    default_cores_for(count)
}

/// Default guest memory for a host with `total_mb` of RAM: half the host,
/// clamped to [4096, 32768].
pub fn default_memory_for(total_mb: u64) -> u64 {
    (total_mb / 2).clamp(4096, 32768)
}

/// Default guest memory in MB, read from /proc/meminfo.
pub fn detect_memory_mb() -> u64 {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return 8192;
    };
    let total_kb = meminfo
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if total_kb == 0 {
        return 8192;
    }
    default_memory_for(total_kb / 1024)
}

/// Minimum sensible disk size for a release.
pub fn default_disk_gb(macos: &str) -> u64 {
    match macos {
        "tahoe" => 160,
        "sequoia" => 128,
        "sonoma" => 96,
        _ => 80,
    }
}

/// Directories that can hold ISO images, most-preferred first.
///
/// The default ISO directory always heads the list; active storages with
/// ISO content resolved through the hypervisor follow.
pub fn detect_iso_storage(runner: &dyn CommandRunner) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(DEFAULT_ISO_DIR)];

    let status = runner.run(&[
        "pvesm".into(),
        "status".into(),
        "--content".into(),
        "iso".into(),
    ]);
    if status.ok {
        for line in status.output.lines().skip(1) {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 3 || cols[2] != "active" {
                continue;
            }
            let name = cols[0];
            if let Some(path) = storage_path(runner, name) {
                let iso = path.join("template").join("iso");
                if !dirs.contains(&iso) {
                    dirs.push(iso);
                }
            }
        }
    }
    dirs
}

fn storage_path(runner: &dyn CommandRunner, name: &str) -> Option<PathBuf> {
    let result = runner.run(&[
        "pvesh".into(),
        "get".into(),
        format!("/storage/{name}"),
        "--output-format".into(),
        "json".into(),
    ]);
    if !result.ok {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&result.output).ok()?;
    value
        .get("path")
        .and_then(|p| p.as_str())
        .map(PathBuf::from)
}

/// Next free VMID.
///
/// Asks the cluster API first, falls back to max(existing)+1 from
/// `qm list`, clamps to [100, 999999], and defaults to 900 when the host
/// answers nothing useful.
pub fn next_vmid(runner: &dyn CommandRunner) -> u32 {
    let result = runner.run(&["pvesh".into(), "get".into(), "/cluster/nextid".into()]);
    if result.ok {
        if let Ok(vmid) = result.output.trim().parse::<u32>() {
            if (100..=999_999).contains(&vmid) {
                return vmid;
            }
        }
    }

    debug!("cluster nextid unavailable, falling back to qm list");
    let list = runner.run(&["qm".into(), "list".into()]);
    if list.ok {
        let max = list
            .output
            .lines()
            .skip(1)
            .filter_map(|l| l.split_whitespace().next())
            .filter_map(|v| v.parse::<u32>().ok())
            .max();
        if let Some(max) = max {
            return (max + 1).clamp(100, 999_999);
        }
    }
    900
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RecordingRunner;

    const INTEL_LEGACY: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\nmodel\t\t: 85\nmodel name\t: Intel(R) Xeon(R) Gold 6130\n\nprocessor\t: 1\nvendor_id\t: GenuineIntel\n";
    const INTEL_HYBRID: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\nmodel\t\t: 183\nmodel name\t: 13th Gen Intel(R) Core(TM) i9-13900K\n";
    const AMD: &str = "processor\t: 0\nvendor_id\t: AuthenticAMD\ncpu family\t: 25\nmodel\t\t: 97\nmodel name\t: AMD Ryzen 9 7950X\n";

    #[test]
    fn test_parse_legacy_intel() {
        let cpu = parse_cpu_info(INTEL_LEGACY);
        assert_eq!(cpu.vendor, CpuVendor::Intel);
        assert_eq!(cpu.family, 6);
        assert_eq!(cpu.model, 85);
        assert!(!cpu.needs_emulated_cpu);
        assert!(cpu.model_name.contains("Xeon"));
    }

    #[test]
    fn test_parse_hybrid_intel_needs_emulation() {
        let cpu = parse_cpu_info(INTEL_HYBRID);
        assert!(cpu.needs_emulated_cpu);
    }

    #[test]
    fn test_future_intel_model_over_threshold() {
        let text = INTEL_HYBRID.replace(": 183", ": 201");
        assert!(parse_cpu_info(&text).needs_emulated_cpu);
    }

    #[test]
    fn test_parse_amd_always_emulated() {
        let cpu = parse_cpu_info(AMD);
        assert_eq!(cpu.vendor, CpuVendor::Amd);
        assert!(cpu.needs_emulated_cpu);
    }

    #[test]
    fn test_empty_cpuinfo_defaults_intel() {
        let cpu = parse_cpu_info("");
        assert_eq!(cpu.vendor, CpuVendor::Intel);
        assert!(!cpu.needs_emulated_cpu);
    }

    #[test]
    fn test_default_cores_power_of_two() {
        assert_eq!(default_cores_for(4), 4);
        assert_eq!(default_cores_for(6), 4);
        assert_eq!(default_cores_for(8), 4);
        assert_eq!(default_cores_for(12), 4);
        assert_eq!(default_cores_for(16), 8);
        assert_eq!(default_cores_for(24), 8);
        assert_eq!(default_cores_for(64), 16);
        assert_eq!(default_cores_for(1), 2);
        for n in 1..=256 {
            let cores = default_cores_for(n);
            assert!(cores >= 2);
            assert!(cores.is_power_of_two());
        }
    }

    #[test]
    fn test_default_memory_bounds() {
        assert_eq!(default_memory_for(4096), 4096);
        assert_eq!(default_memory_for(32768), 16384);
        assert_eq!(default_memory_for(262144), 32768);
    }

    #[test]
    fn test_default_disk_table() {
        assert_eq!(default_disk_gb("tahoe"), 160);
        assert_eq!(default_disk_gb("sequoia"), 128);
        assert_eq!(default_disk_gb("sonoma"), 96);
        assert_eq!(default_disk_gb("ventura"), 80);
    }

    #[test]
    fn test_next_vmid_from_cluster() {
        let runner = RecordingRunner::new().respond_ok("/cluster/nextid", "105\n");
        assert_eq!(next_vmid(&runner), 105);
    }

    #[test]
    fn test_next_vmid_fallback_to_qm_list() {
        let runner = RecordingRunner::new()
            .respond_fail("/cluster/nextid", 2, "no cluster")
            .respond_ok(
                "qm list",
                "VMID NAME  STATUS\n100 a running\n901 b stopped\n",
            );
        assert_eq!(next_vmid(&runner), 902);
    }

    #[test]
    fn test_next_vmid_total_failure_defaults_900() {
        let runner = RecordingRunner::new()
            .respond_fail("/cluster/nextid", 2, "")
            .respond_fail("qm list", 2, "");
        assert_eq!(next_vmid(&runner), 900);
    }

    #[test]
    fn test_iso_storage_head_is_default_dir() {
        let runner = RecordingRunner::new()
            .respond_ok(
                "pvesm status",
                "Name  Type  Status  Total Used Avail %\nnas dir active 1 1 1 1%\n",
            )
            .respond_ok("/storage/nas", r#"{"path":"/mnt/pve/nas","type":"dir"}"#);
        let dirs = detect_iso_storage(&runner);
        assert_eq!(dirs[0], PathBuf::from(DEFAULT_ISO_DIR));
        assert!(dirs.contains(&PathBuf::from("/mnt/pve/nas/template/iso")));
    }
}

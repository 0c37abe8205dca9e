//! Preflight checks
//!
//! Enumerates everything the host needs before a live apply: the Proxmox
//! toolchain, the image-conditioning toolbelt, KVM state, and privileges.
//! No check may panic or error; each returns a (name, ok, details) tuple
//! and the front-end gates live apply on all of them passing.

use crate::probes::detect_cpu_info;
use osxpve_common::PreflightCheck;
use std::path::{Path, PathBuf};

const PROXMOX_BINARIES: &[&str] = &["qm", "pvesm", "pvesh", "qemu-img"];

const BUILD_BINARIES: &[(&str, &str)] = &[
    ("dmg2img", "apt install dmg2img"),
    ("sgdisk", "apt install gdisk"),
    ("partprobe", "apt install parted"),
    ("losetup", "apt install mount"),
    ("mkfs.fat", "apt install dosfstools"),
    ("blkid", "apt install util-linux"),
];

/// Locate a binary on PATH or in the sbin directories Proxmox favors.
fn find_binary(cmd: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(cmd) {
        return Some(path);
    }
    for prefix in ["/usr/sbin", "/sbin", "/usr/bin", "/bin"] {
        let candidate = Path::new(prefix).join(cmd);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// ignore_msrs=Y is critical: macOS pokes MSRs KVM does not implement and
/// the guest kernel panics without it.
fn check_ignore_msrs(kvm_conf: &Path) -> PreflightCheck {
    if let Ok(content) = std::fs::read_to_string(kvm_conf) {
        if content.contains("ignore_msrs=Y") {
            return PreflightCheck {
                name: "KVM ignore_msrs".into(),
                ok: true,
                details: format!("ignore_msrs=Y set in {}", kvm_conf.display()),
            };
        }
    }
    PreflightCheck {
        name: "KVM ignore_msrs".into(),
        ok: false,
        details: "Missing ignore_msrs=Y. Fix: echo 'options kvm ignore_msrs=Y' >> \
                  /etc/modprobe.d/kvm.conf && update-initramfs -k all -u"
            .into(),
    }
}

/// IOMMU is informational only: needed for GPU passthrough, not install.
fn check_iommu(cmdline: &Path) -> PreflightCheck {
    let content = std::fs::read_to_string(cmdline).unwrap_or_default();
    let enabled = content.contains("intel_iommu=on") || content.contains("amd_iommu=on");
    PreflightCheck {
        name: "IOMMU enabled".into(),
        ok: true,
        details: if enabled {
            "IOMMU enabled in kernel cmdline (required for GPU passthrough)".into()
        } else {
            "IOMMU not detected in kernel cmdline, only needed for GPU passthrough".into()
        },
    }
}

/// PVE 8+ wants sysfb_init blacklisted for passthrough; informational.
fn check_initcall_blacklist(cmdline: &Path) -> PreflightCheck {
    let content = std::fs::read_to_string(cmdline).unwrap_or_default();
    let set = content.contains("initcall_blacklist=sysfb_init");
    PreflightCheck {
        name: "initcall_blacklist".into(),
        ok: true,
        details: if set {
            "sysfb_init blacklisted in kernel cmdline (PVE 8+ GPU passthrough)".into()
        } else {
            "initcall_blacklist not set, only needed for PVE 8+ GPU passthrough".into()
        },
    }
}

/// Run every host readiness check.
pub fn run_preflight() -> Vec<PreflightCheck> {
    run_preflight_at(
        Path::new("/etc/modprobe.d/kvm.conf"),
        Path::new("/proc/cmdline"),
        Path::new("/dev/kvm"),
    )
}

/// Variant with injectable paths, used by tests.
pub fn run_preflight_at(kvm_conf: &Path, cmdline: &Path, kvm_dev: &Path) -> Vec<PreflightCheck> {
    let mut checks = Vec::new();

    for cmd in PROXMOX_BINARIES {
        let binary = find_binary(cmd);
        checks.push(PreflightCheck {
            name: format!("{cmd} available"),
            ok: binary.is_some(),
            details: binary
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("{cmd} not found in PATH or common system paths")),
        });
    }

    for (cmd, install_hint) in BUILD_BINARIES {
        let binary = find_binary(cmd);
        checks.push(PreflightCheck {
            name: format!("{cmd} available"),
            ok: binary.is_some(),
            details: binary
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("Not found. Install with: {install_hint}")),
        });
    }

    checks.push(check_ignore_msrs(kvm_conf));
    checks.push(check_iommu(cmdline));
    checks.push(check_initcall_blacklist(cmdline));

    let cpu = detect_cpu_info();
    checks.push(PreflightCheck {
        name: "CPU vendor".into(),
        ok: true,
        details: format!(
            "{} - {}",
            cpu.vendor,
            if cpu.needs_emulated_cpu {
                "Cascadelake-Server emulation"
            } else {
                "native host passthrough"
            }
        ),
    });

    checks.push(PreflightCheck {
        name: "/dev/kvm present".into(),
        ok: kvm_dev.exists(),
        details: "Required for hardware acceleration".into(),
    });

    checks.push(PreflightCheck {
        name: "Root privileges".into(),
        ok: is_root(),
        details: "Current UID must be root (uid=0) for full workflow".into(),
    });

    checks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_never_panics_and_covers_toolbelt() {
        let checks = run_preflight();
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        for cmd in ["qm", "pvesm", "pvesh", "qemu-img", "dmg2img", "sgdisk", "mkfs.fat"] {
            assert!(names.iter().any(|n| n.starts_with(cmd)), "missing check for {cmd}");
        }
        assert!(names.contains(&"KVM ignore_msrs"));
        assert!(names.contains(&"/dev/kvm present"));
        assert!(names.contains(&"Root privileges"));
    }

    #[test]
    fn test_ignore_msrs_detection() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("kvm.conf");
        std::fs::write(&conf, "options kvm ignore_msrs=Y\n").unwrap();
        assert!(check_ignore_msrs(&conf).ok);

        std::fs::write(&conf, "options kvm nested=1\n").unwrap();
        let check = check_ignore_msrs(&conf);
        assert!(!check.ok);
        assert!(check.details.contains("update-initramfs"));
    }

    #[test]
    fn test_ignore_msrs_missing_file_fails_closed() {
        assert!(!check_ignore_msrs(Path::new("/nonexistent/kvm.conf")).ok);
    }

    #[test]
    fn test_iommu_is_informational() {
        let dir = tempfile::tempdir().unwrap();
        let cmdline = dir.path().join("cmdline");
        std::fs::write(&cmdline, "quiet intel_iommu=on\n").unwrap();
        assert!(check_iommu(&cmdline).ok);

        std::fs::write(&cmdline, "quiet\n").unwrap();
        // Still ok: informational.
        assert!(check_iommu(&cmdline).ok);
        assert!(check_initcall_blacklist(&cmdline).ok);
    }
}

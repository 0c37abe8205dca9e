//! Asset resolution
//!
//! Locates the OpenCore boot image and the macOS recovery/installer image
//! across the host's ISO storage roots. Patterns are tried in priority
//! order so exact filenames win over globs and a stray legacy image never
//! shadows the intended one.

use osxpve_common::{ReleaseChannel, VmConfig, release_info, AssetCheck, DEFAULT_ISO_DIR};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Universal OpenCore image name shipped with project releases.
pub const OPENCORE_UNIVERSAL: &str = "opencore-osxpve-vm.iso";

/// Search roots in priority order: explicit override, the default ISO
/// directory, then every /mnt/pve storage that carries template/iso.
pub fn iso_roots(iso_dir_override: &str) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if !iso_dir_override.is_empty() {
        roots.push(PathBuf::from(iso_dir_override));
    }
    roots.push(PathBuf::from(DEFAULT_ISO_DIR));

    let mnt_pve = Path::new("/mnt/pve");
    if let Ok(entries) = std::fs::read_dir(mnt_pve) {
        let mut mounts: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().join("template").join("iso"))
            .collect();
        mounts.sort();
        roots.extend(mounts);
    }
    roots
}

/// Case-insensitive shell-style glob: `*` matches any run, `?` one char.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).expect("glob pattern converts to valid regex")
}

/// Find the first file matching `patterns`, trying each pattern across all
/// roots before moving to the next. Directories with matching names are
/// skipped.
pub fn find_image(roots: &[PathBuf], patterns: &[String]) -> Option<PathBuf> {
    for pattern in patterns {
        let regex = glob_to_regex(&pattern.to_lowercase());
        for root in roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            let mut candidates: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
            candidates.sort();
            for candidate in candidates {
                if !candidate.is_file() {
                    continue;
                }
                let Some(name) = candidate.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if regex.is_match(&name.to_lowercase()) {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Resolve the OpenCore image for a release, or its canonical default
/// location when nothing is staged yet.
pub fn resolve_opencore_path(macos: &str, iso_dir_override: &str) -> PathBuf {
    let roots = iso_roots(iso_dir_override);
    let patterns = vec![
        OPENCORE_UNIVERSAL.to_string(),
        format!("opencore-{macos}.iso"),
        format!("opencore*{macos}*.iso"),
        "opencore*.iso".to_string(),
    ];
    find_image(&roots, &patterns).unwrap_or_else(|| default_dir(iso_dir_override).join(format!("opencore-{macos}.iso")))
}

/// Resolve the recovery image (stable releases) or full installer
/// (preview release), or the canonical default location.
pub fn resolve_recovery_or_installer_path(config: &VmConfig) -> PathBuf {
    if !config.installer_path.is_empty() {
        return PathBuf::from(&config.installer_path);
    }
    let roots = iso_roots(&config.iso_dir);
    let macos = &config.macos;

    if release_info(macos).map(|r| r.channel) == Some(ReleaseChannel::Preview) {
        let patterns = vec![
            format!("{macos}-full-installer.img"),
            format!("*{macos}*full*.img"),
            format!("*{macos}*full*.iso"),
            format!("*{macos}*.iso"),
            "*InstallAssistant*.img".to_string(),
        ];
        if let Some(found) = find_image(&roots, &patterns) {
            return found;
        }
    }

    let patterns = vec![
        format!("{macos}-recovery.img"),
        format!("{macos}-recovery.iso"),
        format!("{macos}-recovery.dmg"),
    ];
    find_image(&roots, &patterns)
        .unwrap_or_else(|| default_dir(&config.iso_dir).join(format!("{macos}-recovery.img")))
}

fn default_dir(iso_dir_override: &str) -> PathBuf {
    if iso_dir_override.is_empty() {
        PathBuf::from(DEFAULT_ISO_DIR)
    } else {
        PathBuf::from(iso_dir_override)
    }
}

/// Presence checks for the two images a plan needs.
pub fn required_assets(config: &VmConfig) -> Vec<AssetCheck> {
    let opencore = resolve_opencore_path(&config.macos, &config.iso_dir);
    let recovery = resolve_recovery_or_installer_path(config);
    let preview =
        release_info(&config.macos).map(|r| r.channel) == Some(ReleaseChannel::Preview);

    vec![
        AssetCheck {
            name: "OpenCore image".into(),
            present: opencore.exists(),
            path: opencore,
            hint: "Provide the OpenCore boot image before a live apply.".into(),
            downloadable: true,
        },
        AssetCheck {
            name: "Installer / recovery image".into(),
            present: recovery.exists(),
            path: recovery,
            hint: if preview {
                "Preview releases install from a full installer image.".into()
            } else {
                "Recovery image can be fetched from Apple automatically.".into()
            },
            downloadable: true,
        },
    ]
}

/// Canned hints printed when assets are missing.
pub fn suggested_fetch_commands(config: &VmConfig) -> Vec<String> {
    let iso_root = default_dir(&config.iso_dir);
    let iso_root = iso_root.display();
    let macos = &config.macos;
    let preview =
        release_info(macos).map(|r| r.channel) == Some(ReleaseChannel::Preview);

    if preview {
        vec![
            format!("# Auto-download available: osxpve download --macos {macos}"),
            format!("# Or manually place the OpenCore image at {iso_root}/opencore-{macos}.iso"),
            format!("# Or place a full installer image at {iso_root}/{macos}-full-installer.img"),
        ]
    } else {
        vec![
            format!("# Auto-download available: osxpve download --macos {macos}"),
            format!("# Or manually place the OpenCore image at {iso_root}/opencore-{macos}.iso"),
            format!("# Or place a recovery image at {iso_root}/{macos}-recovery.img"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_exact_name_wins_over_glob() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("opencore-legacy-sequoia-old.iso"));
        touch(&dir.path().join("opencore-sequoia.iso"));

        let roots = vec![dir.path().to_path_buf()];
        let patterns = vec![
            "opencore-sequoia.iso".to_string(),
            "opencore*sequoia*.iso".to_string(),
        ];
        let found = find_image(&roots, &patterns).unwrap();
        assert_eq!(found.file_name().unwrap(), "opencore-sequoia.iso");
    }

    #[test]
    fn test_pattern_priority_across_roots() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        // Root order must not beat pattern order: the exact name in the
        // second root wins over a glob match in the first.
        touch(&a.path().join("opencore-sequoia-v2.iso"));
        touch(&b.path().join("opencore-sequoia.iso"));

        let roots = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let patterns = vec![
            "opencore-sequoia.iso".to_string(),
            "opencore*sequoia*.iso".to_string(),
        ];
        let found = find_image(&roots, &patterns).unwrap();
        assert_eq!(found.file_name().unwrap(), "opencore-sequoia.iso");
    }

    #[test]
    fn test_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sequoia-recovery.img")).unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let patterns = vec!["sequoia-recovery.img".to_string()];
        assert!(find_image(&roots, &patterns).is_none());
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Sequoia-Recovery.IMG"));
        let roots = vec![dir.path().to_path_buf()];
        let patterns = vec!["sequoia-recovery.img".to_string()];
        assert!(find_image(&roots, &patterns).is_some());
    }

    #[test]
    fn test_installer_path_override_wins() {
        let mut config = test_config("tahoe");
        config.installer_path = "/tmp/tahoe.iso".into();
        assert_eq!(
            resolve_recovery_or_installer_path(&config),
            PathBuf::from("/tmp/tahoe.iso")
        );
    }

    #[test]
    fn test_default_paths_when_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        let iso_dir = dir.path().to_str().unwrap().to_string();

        let oc = resolve_opencore_path("sequoia", &iso_dir);
        assert_eq!(oc, dir.path().join("opencore-sequoia.iso"));

        let mut config = test_config("sequoia");
        config.iso_dir = iso_dir;
        let recovery = resolve_recovery_or_installer_path(&config);
        assert_eq!(recovery, dir.path().join("sequoia-recovery.img"));
    }

    #[test]
    fn test_required_assets_reflect_presence() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("opencore-sequoia.iso"));

        let mut config = test_config("sequoia");
        config.iso_dir = dir.path().to_str().unwrap().to_string();
        let checks = required_assets(&config);
        assert_eq!(checks.len(), 2);
        assert!(checks[0].present, "opencore staged");
        assert!(!checks[1].present, "recovery missing");
        assert!(checks.iter().all(|c| c.downloadable));
    }

    #[test]
    fn test_fetch_hints_mention_release() {
        let config = test_config("sonoma");
        let hints = suggested_fetch_commands(&config);
        assert!(hints.iter().any(|h| h.contains("download --macos sonoma")));
        assert!(hints.iter().any(|h| h.contains("sonoma-recovery.img")));

        let preview = test_config("tahoe");
        let hints = suggested_fetch_commands(&preview);
        assert!(hints.iter().any(|h| h.contains("tahoe-full-installer.img")));
    }

    fn test_config(macos: &str) -> VmConfig {
        VmConfig::new(901, "macos-test", macos, 8, 16384, 128, "vmbr0", "local-lvm")
    }
}

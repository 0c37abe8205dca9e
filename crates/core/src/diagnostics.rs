//! Diagnostics and recovery guidance
//!
//! Health score over the preflight checks, canned remediation hints keyed
//! by failure text, and a gzip'd support bundle of logs and snapshots.

use crate::preflight::run_preflight;
use flate2::write::GzEncoder;
use flate2::Compression;
use osxpve_common::{generated_dir, HealthStatus, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Summarize preflight into a single score.
pub fn build_health_status() -> HealthStatus {
    let checks = run_preflight();
    let score = checks.iter().filter(|c| c.ok).count();
    HealthStatus {
        score,
        total: checks.len(),
        summary: format!("Health {score}/{} checks", checks.len()),
    }
}

/// Map free-form failure text to remediation bullets.
pub fn recovery_guide(reason: &str) -> Vec<String> {
    let mut hints = vec![
        "Re-run Host Preflight and resolve all FAIL checks.".to_string(),
        "Confirm OpenCore and installer images exist in expected paths.".to_string(),
        "Re-generate plan and compare against previous successful plan.".to_string(),
    ];
    let reason = reason.to_lowercase();
    if reason.contains("boot") {
        hints.push("Check VM boot order and attached media in qm config.".to_string());
    }
    if reason.contains("asset") || reason.contains("iso") {
        hints.push("Re-stage installer/recovery image and verify file size/checksum.".to_string());
    }
    if reason.contains("download") || reason.contains("network") {
        hints.push("Verify outbound connectivity to github.com and apple.com endpoints.".to_string());
    }
    hints
}

/// Archive `generated/logs` and `generated/snapshots` into a timestamped
/// support bundle, returning its path.
pub fn export_support_bundle() -> Result<PathBuf> {
    export_support_bundle_in(&generated_dir())
}

/// Variant with an injectable generated directory.
pub fn export_support_bundle_in(generated: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(generated)?;
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let bundle_path = generated.join(format!("support-bundle-{ts}.tar.gz"));

    let file = std::fs::File::create(&bundle_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for name in ["logs", "snapshots"] {
        let dir = generated.join(name);
        if dir.exists() {
            builder.append_dir_all(name, &dir)?;
        }
    }

    builder.into_inner()?.finish()?;
    info!("support bundle written to {}", bundle_path.display());
    Ok(bundle_path)
}

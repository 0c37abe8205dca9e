//! Rollback snapshots
//!
//! Before a live apply the current VM config (if any) is dumped to a
//! timestamped file so a failed install leaves a known-good reference
//! behind.

use crate::adapter::CommandRunner;
use osxpve_common::{generated_dir, Result, RollbackSnapshot};
use std::path::Path;
use tracing::info;

/// Dump the prior VM config under `./generated/snapshots/`.
pub fn create_snapshot(vmid: u32, runner: &dyn CommandRunner) -> Result<RollbackSnapshot> {
    create_snapshot_in(&generated_dir(), vmid, runner)
}

/// Dump the prior VM config under `<generated>/snapshots/`.
pub fn create_snapshot_in(
    generated: &Path,
    vmid: u32,
    runner: &dyn CommandRunner,
) -> Result<RollbackSnapshot> {
    let out_dir = generated.join("snapshots");
    std::fs::create_dir_all(&out_dir)?;
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let path = out_dir.join(format!("vm-{vmid}-{ts}.conf"));

    let result = runner.run(&["qm".into(), "config".into(), vmid.to_string()]);
    let content = if result.ok {
        result.output
    } else {
        "# No existing VM config captured\n".to_string()
    };
    std::fs::write(&path, content)?;
    info!("snapshot of VM {} written to {}", vmid, path.display());

    Ok(RollbackSnapshot { vmid, path })
}

/// Canned rollback guidance for a failed apply.
pub fn rollback_hints(snapshot: &RollbackSnapshot) -> Vec<String> {
    vec![
        format!("Review snapshot: {}", snapshot.path.display()),
        format!("If needed: qm destroy {} --purge", snapshot.vmid),
        "Re-apply previous known-good config from snapshot content.".to_string(),
    ]
}

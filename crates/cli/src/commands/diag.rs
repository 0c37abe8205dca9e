//! `preflight`, `bundle`, and `guide` - host diagnostics

use crate::output;
use osxpve_core::diagnostics::{export_support_bundle, recovery_guide};
use osxpve_core::preflight::run_preflight;

pub fn preflight() -> anyhow::Result<i32> {
    let checks = run_preflight();
    println!("{}", output::preflight_table(&checks));
    let ok = checks.iter().filter(|c| c.ok).count();
    println!("{ok}/{} checks passed", checks.len());
    Ok(0)
}

pub fn bundle() -> anyhow::Result<i32> {
    let path = export_support_bundle()?;
    println!("{}", path.display());
    Ok(0)
}

pub fn guide(reason: &str) -> anyhow::Result<i32> {
    for line in recovery_guide(reason) {
        println!("{line}");
    }
    Ok(0)
}

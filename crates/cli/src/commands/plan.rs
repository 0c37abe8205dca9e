//! `plan` - show the install plan without touching the host

use super::{resolve_and_plan, PlanOutcome, VmFlags};
use crate::output;
use osxpve_core::adapter::CommandRunner;
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub vm: VmFlags,

    /// Also write the plan as a standalone bash script
    #[arg(long)]
    pub script_out: Option<PathBuf>,
}

pub fn execute(args: PlanArgs, runner: &dyn CommandRunner) -> anyhow::Result<i32> {
    let (config, steps) = match resolve_and_plan(args.vm, runner)? {
        PlanOutcome::Exit(code) => return Ok(code),
        PlanOutcome::Ready { config, steps } => (config, steps),
    };

    output::print_plan(&steps);

    if let Some(out) = args.script_out {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out, osxpve_core::render_script(&config, &steps))?;
        println!("Script written: {}", out.display());
    }
    Ok(0)
}

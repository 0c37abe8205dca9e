//! `apply` - run the install plan (dry-run unless --execute)

use super::{resolve_and_plan, PlanOutcome, VmFlags};
use crate::output::status_marker;
use colored::Colorize;
use osxpve_common::{PlanStep, StepResult};
use osxpve_core::adapter::CommandRunner;
use osxpve_core::{apply_plan, create_snapshot, preflight, rollback_hints};

#[derive(clap::Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub vm: VmFlags,

    /// Actually run the plan (default is dry-run)
    #[arg(long)]
    pub execute: bool,
}

pub fn execute(args: ApplyArgs, runner: &dyn CommandRunner) -> anyhow::Result<i32> {
    let live = args.execute;

    if live {
        let failed: Vec<_> = preflight::run_preflight()
            .into_iter()
            .filter(|c| !c.ok)
            .collect();
        if !failed.is_empty() {
            eprintln!("{}", "Live apply blocked by failing preflight checks:".red());
            for check in failed {
                eprintln!("  {} {}: {}", status_marker(false), check.name, check.details);
            }
            eprintln!("Run `osxpve preflight` and resolve the failures first.");
            return Ok(4);
        }
    }

    let (config, steps) = match resolve_and_plan(args.vm, runner)? {
        PlanOutcome::Exit(code) => return Ok(code),
        PlanOutcome::Ready { config, steps } => (config, steps),
    };

    let snapshot = if live {
        Some(create_snapshot(config.vmid, runner)?)
    } else {
        None
    };

    let mut on_step = |index: usize, total: usize, step: &PlanStep, result: Option<&StepResult>| {
        match result {
            None => println!("[{index}/{total}] {}...", step.title),
            Some(result) => println!("[{index}/{total}] {} {}", step.title, status_marker(result.ok)),
        }
    };
    let result = apply_plan(&steps, live, runner, Some(&mut on_step))?;

    if result.ok {
        println!("Apply {}. Log: {}", "OK".green(), result.log_path.display());
        return Ok(0);
    }

    eprintln!("Apply {}. Log: {}", "FAILED".red(), result.log_path.display());
    if let Some(failing) = result.results.last() {
        eprintln!("Failing step: {} (rc={})", failing.title, failing.returncode);
    }
    if let Some(snapshot) = snapshot {
        for hint in rollback_hints(&snapshot) {
            eprintln!("{} {}", "ROLLBACK:".yellow(), hint);
        }
    }
    Ok(4)
}

//! `uninstall` - destroy an existing macOS VM

use crate::output;
use colored::Colorize;
use osxpve_core::adapter::CommandRunner;
use osxpve_core::planner::{build_destroy_plan, fetch_vm_info};
use osxpve_core::{apply_plan, create_snapshot};

#[derive(clap::Args, Debug)]
pub struct UninstallArgs {
    /// VM ID to destroy
    #[arg(long)]
    pub vmid: u32,

    /// Also delete all disk images
    #[arg(long)]
    pub purge: bool,

    /// Actually run (default is dry run)
    #[arg(long)]
    pub execute: bool,
}

pub fn execute(args: UninstallArgs, runner: &dyn CommandRunner) -> anyhow::Result<i32> {
    if args.vmid < 100 || args.vmid > 999_999 {
        eprintln!("{} VMID must be between 100 and 999999.", "ERROR:".red());
        return Ok(2);
    }

    let steps = build_destroy_plan(args.vmid, args.purge);

    if !args.execute {
        println!("Target: VM {}", args.vmid);
        output::print_plan(&steps);
        return Ok(0);
    }

    let Some(info) = fetch_vm_info(args.vmid, runner) else {
        eprintln!("{} VM {} not found.", "ERROR:".red(), args.vmid);
        return Ok(2);
    };
    println!("VM {}: {} ({})", info.vmid, info.name, info.status);

    let snapshot = create_snapshot(args.vmid, runner)?;
    println!("Snapshot saved: {}", snapshot.path.display());

    let result = apply_plan(&steps, true, runner, None)?;
    if result.ok {
        println!("Destroy {}. Log: {}", "OK".green(), result.log_path.display());
        return Ok(0);
    }

    eprintln!("Destroy {}. Log: {}", "FAILED".red(), result.log_path.display());
    Ok(6)
}

//! Terminal output helpers

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use indicatif::{ProgressBar, ProgressStyle};
use osxpve_common::{DownloadProgress, PlanStep, PreflightCheck};

/// Render the preflight checks as a table.
pub fn preflight_table(checks: &[PreflightCheck]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Status", "Check", "Details"]);
    for check in checks {
        let status = if check.ok {
            "OK".green().to_string()
        } else {
            "FAIL".red().to_string()
        };
        table.add_row(vec![
            Cell::new(status),
            Cell::new(&check.name),
            Cell::new(&check.details),
        ]);
    }
    table
}

/// Print a plan as a numbered step list with rendered commands.
pub fn print_plan(steps: &[PlanStep]) {
    for (idx, step) in steps.iter().enumerate() {
        println!("{:02}. {}", idx + 1, step.title.bold());
        println!("    {}", step.command());
    }
}

/// Progress bar wired to the core's download callback.
pub fn download_bar(label: &str) -> (ProgressBar, impl Fn(DownloadProgress)) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg} {bytes}/{total_bytes} ({eta}) {wide_bar}")
            .expect("static template parses"),
    );
    bar.set_message(label.to_string());

    let handle = bar.clone();
    let callback = move |progress: DownloadProgress| {
        if progress.total > 0 && handle.length() != Some(progress.total) {
            handle.set_length(progress.total);
        }
        handle.set_position(progress.downloaded);
    };
    (bar, callback)
}

/// OK/FAIL marker for plain status lines.
pub fn status_marker(ok: bool) -> String {
    if ok {
        "OK".green().to_string()
    } else {
        "FAIL".red().to_string()
    }
}

//! Plan executor
//!
//! Applies a plan dry or live: per-step callbacks before and after each
//! invocation, stdout+stderr appended to a timestamped log, and a hard
//! stop at the first failure. Dry-run writes `[DRY-RUN]` lines and never
//! touches the host.

use crate::adapter::CommandRunner;
use osxpve_common::{generated_dir, ApplyResult, PlanStep, Result, StepResult};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Callback invoked before each step (result `None`) and after it
/// (result `Some`). Front-ends may marshal this to their UI thread.
pub type StepCallback<'a> = &'a mut dyn FnMut(usize, usize, &PlanStep, Option<&StepResult>);

/// Apply a plan, logging under `./generated/logs/`.
pub fn apply_plan(
    steps: &[PlanStep],
    execute: bool,
    runner: &dyn CommandRunner,
    on_step: Option<StepCallback<'_>>,
) -> Result<ApplyResult> {
    apply_plan_in(&generated_dir(), steps, execute, runner, on_step)
}

/// Apply a plan sequentially, logging under `<generated>/logs/`.
///
/// Steps execute strictly in order; the first failing step ends the run
/// with `ok == false` and `results.len() == index_of_failure + 1`.
pub fn apply_plan_in(
    generated: &Path,
    steps: &[PlanStep],
    execute: bool,
    runner: &dyn CommandRunner,
    mut on_step: Option<StepCallback<'_>>,
) -> Result<ApplyResult> {
    let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let log_dir = generated.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("apply-{ts}.log"));
    let mut log = std::fs::File::create(&log_path)?;
    writeln!(log, "# apply_plan execute={execute}")?;

    let total = steps.len();
    let mut results = Vec::with_capacity(total);

    for (idx, step) in steps.iter().enumerate() {
        let index = idx + 1;
        if let Some(cb) = on_step.as_deref_mut() {
            cb(index, total, step, None);
        }

        if !execute {
            let line = format!("[DRY-RUN] {}: {}", step.title, step.command());
            writeln!(log, "{line}")?;
            let result = StepResult {
                title: step.title.clone(),
                command: step.command(),
                ok: true,
                returncode: 0,
                output: line,
            };
            results.push(result);
            if let Some(cb) = on_step.as_deref_mut() {
                cb(index, total, step, results.last());
            }
            continue;
        }

        info!("[{}/{}] {}", index, total, step.title);
        let cmd_result = runner.run(&step.argv);
        writeln!(
            log,
            "## {}\n$ {}\n{}\nrc={}",
            step.title,
            step.command(),
            cmd_result.output,
            cmd_result.returncode
        )?;

        let result = StepResult {
            title: step.title.clone(),
            command: step.command(),
            ok: cmd_result.ok,
            returncode: cmd_result.returncode,
            output: cmd_result.output,
        };
        let failed = !result.ok;
        results.push(result);
        if let Some(cb) = on_step.as_deref_mut() {
            cb(index, total, step, results.last());
        }

        if failed {
            warn!("step '{}' failed, aborting plan", step.title);
            return Ok(ApplyResult {
                ok: false,
                results,
                log_path,
            });
        }
    }

    Ok(ApplyResult {
        ok: true,
        results,
        log_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::RecordingRunner;

    fn sample_steps() -> Vec<PlanStep> {
        vec![
            PlanStep::new("First", vec!["qm".into(), "create".into(), "901".into()]),
            PlanStep::new("Second", vec!["qm".into(), "set".into(), "901".into()]),
            PlanStep::new("Third", vec!["qm".into(), "start".into(), "901".into()]),
        ]
    }

    #[test]
    fn test_dry_run_issues_no_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let result = apply_plan_in(dir.path(), &sample_steps(), false, &runner, None).unwrap();
        assert!(result.ok);
        assert_eq!(result.results.len(), 3);
        assert!(runner.calls().is_empty(), "dry-run must not execute");
        let log = std::fs::read_to_string(&result.log_path).unwrap();
        assert!(log.contains("[DRY-RUN] First"));
    }

    #[test]
    fn test_live_apply_runs_all_steps() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let result = apply_plan_in(dir.path(), &sample_steps(), true, &runner, None).unwrap();
        assert!(result.ok);
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_failure_stops_at_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().respond_fail("qm set", 1, "boom: no storage");
        let result = apply_plan_in(dir.path(), &sample_steps(), true, &runner, None).unwrap();
        assert!(!result.ok);
        assert_eq!(result.results.len(), 2, "stop right after the failure");
        assert!(!result.results[1].ok);
        assert_eq!(result.results[1].returncode, 1);
        // Third step never ran.
        assert_eq!(runner.calls().len(), 2);

        let log = std::fs::read_to_string(&result.log_path).unwrap();
        assert!(log.contains("boom: no storage"));
        assert!(!log.contains("qm start"));
    }

    #[test]
    fn test_callback_fires_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let mut events: Vec<(usize, bool)> = Vec::new();
        {
            let mut cb =
                |index: usize, total: usize, _step: &PlanStep, result: Option<&StepResult>| {
                    assert_eq!(total, 3);
                    events.push((index, result.is_some()));
                };
            apply_plan_in(dir.path(), &sample_steps(), true, &runner, Some(&mut cb)).unwrap();
        }
        assert_eq!(
            events,
            vec![
                (1, false),
                (1, true),
                (2, false),
                (2, true),
                (3, false),
                (3, true)
            ]
        );
    }

    #[test]
    fn test_log_file_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let result = apply_plan_in(dir.path(), &sample_steps(), false, &runner, None).unwrap();
        let name = result
            .log_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with("apply-"));
        assert!(name.ends_with("Z.log"));
        assert!(result.log_path.starts_with(dir.path().join("logs")));
    }
}

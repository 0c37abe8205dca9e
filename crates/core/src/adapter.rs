//! External-tool adapter
//!
//! Uniform wrapper for invoking hypervisor binaries. Every plan step runs
//! through this seam, so tests can substitute a recording implementation.

use osxpve_common::{shell_join, CommandResult};
use std::cell::RefCell;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-command timeout. A timed-out command is reported as rc=124.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Subprocess seam used by the planner, executor, probes, and downloader.
///
/// Implementations must not involve a shell: the argv is executed directly,
/// so any shell boundary (`bash -c "..."`) is explicit in the plan itself.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> CommandResult;
}

/// Production adapter for the Proxmox toolchain
#[derive(Debug, Default)]
pub struct ProxmoxAdapter;

impl ProxmoxAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProxmoxAdapter {
    fn run(&self, argv: &[String]) -> CommandResult {
        let rendered = shell_join(argv);
        debug!("exec: {}", rendered);

        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => {
                return CommandResult {
                    ok: false,
                    returncode: -1,
                    output: "empty argv".to_string(),
                }
            }
        };

        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return CommandResult {
                    ok: false,
                    returncode: -1,
                    output: format!("failed to spawn {program}: {err}"),
                }
            }
        };

        // Drain pipes on helper threads so a chatty child cannot fill the
        // pipe buffer and deadlock against our timeout poll.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_handle = std::thread::spawn(move || read_all(stdout));
        let err_handle = std::thread::spawn(move || read_all(stderr));

        let deadline = Instant::now() + COMMAND_TIMEOUT;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!("command timed out after {}s: {}", COMMAND_TIMEOUT.as_secs(), rendered);
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    let _ = child.kill();
                    return CommandResult {
                        ok: false,
                        returncode: -1,
                        output: format!("failed to wait on {program}: {err}"),
                    };
                }
            }
        };

        let stdout = out_handle.join().unwrap_or_default();
        let stderr = err_handle.join().unwrap_or_default();
        let mut output = stdout;
        output.push_str(&stderr);
        let output = output.trim().to_string();

        match status {
            Some(status) => {
                let returncode = status.code().unwrap_or(-1);
                CommandResult {
                    ok: status.success(),
                    returncode,
                    output,
                }
            }
            None => CommandResult {
                ok: false,
                returncode: 124,
                output: format!(
                    "Command timed out after {}s: {}\n{}",
                    COMMAND_TIMEOUT.as_secs(),
                    rendered,
                    output
                ),
            },
        }
    }
}

fn read_all(pipe: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

/// Test adapter: records every argv and answers from substring rules.
///
/// Rules are matched in insertion order against the shell-joined command;
/// unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<Vec<String>>>,
    rules: RefCell<Vec<(String, CommandResult)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `needle` with the given result.
    pub fn respond(self, needle: impl Into<String>, result: CommandResult) -> Self {
        self.rules.borrow_mut().push((needle.into(), result));
        self
    }

    /// Answer commands containing `needle` with a successful result.
    pub fn respond_ok(self, needle: impl Into<String>, output: impl Into<String>) -> Self {
        self.respond(
            needle,
            CommandResult {
                ok: true,
                returncode: 0,
                output: output.into(),
            },
        )
    }

    /// Answer commands containing `needle` with a failure.
    pub fn respond_fail(self, needle: impl Into<String>, returncode: i32, output: impl Into<String>) -> Self {
        self.respond(
            needle,
            CommandResult {
                ok: false,
                returncode,
                output: output.into(),
            },
        )
    }

    /// All argvs run so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    /// Rendered command lines run so far.
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|a| shell_join(a)).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, argv: &[String]) -> CommandResult {
        self.calls.borrow_mut().push(argv.to_vec());
        let rendered = shell_join(argv);
        for (needle, result) in self.rules.borrow().iter() {
            if rendered.contains(needle.as_str()) {
                return result.clone();
            }
        }
        CommandResult {
            ok: true,
            returncode: 0,
            output: String::new(),
        }
    }
}

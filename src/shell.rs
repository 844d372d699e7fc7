//! Shared shell-invocation helper used by the coordinator, dependency
//! graph, and impact analyzer (spec §4.G/H/I), grounded on
//! `coordinator.py::InstallationCoordinator._execute_command`'s
//! timeout/capture semantics, translated onto `tokio::process::Command`.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::process::Command;

/// Outcome of one shell invocation: always returned, never an `Err`, so
/// callers can inspect `success`/`stdout`/`stderr` the way the Python
/// source inspects a `subprocess.CompletedProcess`.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Runs `command` through `sh -c`, capturing combined stdout/stderr,
/// bounded by `timeout`.
pub async fn run(command: &str, timeout: Duration) -> ShellOutput {
    let child = Command::new("sh").arg("-c").arg(command).output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => ShellOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        },
        Ok(Err(err)) => ShellOutput {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: err.to_string(),
            timed_out: false,
        },
        Err(_) => ShellOutput {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("command timed out after {} seconds", timeout.as_secs()),
            timed_out: true,
        },
    }
}

/// Runs `command` and returns its stdout on success, or a structured
/// [`Error::ExecutionFailure`]/[`Error::ExecutionTimeout`] otherwise.
/// Used by code paths (dependency graph, impact analyzer) that treat a
/// nonzero exit as fatal rather than as a per-step record.
pub async fn run_or_fail(command: &str, timeout: Duration) -> Result<String> {
    let output = run(command, timeout).await;
    if output.timed_out {
        return Err(Error::ExecutionTimeout(timeout.as_secs()));
    }
    if !output.success {
        return Err(Error::ExecutionFailure(format!(
            "command `{command}` exited with {:?}: {}",
            output.exit_code, output.stderr
        )));
    }
    Ok(output.stdout)
}

/// Runs `program` with `args` directly (no `sh -c`), so package names and
/// other externally-sourced arguments can never be interpreted by a shell.
/// Used everywhere the dependency graph and impact analyzer shell out to
/// `dpkg-query`/`apt-cache`/`apt-get`/`systemctl`.
pub async fn run_argv(program: &str, args: &[&str], timeout: Duration) -> ShellOutput {
    let child = Command::new(program).args(args).output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => ShellOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        },
        Ok(Err(err)) => ShellOutput {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: err.to_string(),
            timed_out: false,
        },
        Err(_) => ShellOutput {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("command timed out after {} seconds", timeout.as_secs()),
            timed_out: true,
        },
    }
}

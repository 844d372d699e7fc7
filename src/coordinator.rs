//! Sequential step runner with stop-on-error rollback (spec §4.G),
//! grounded on `original_source/cortex/coordinator.py`.

use crate::error::{Error, Result};
use crate::shell;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const VERIFY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// One command in an installation plan, with its execution outcome filled
/// in as [`InstallationCoordinator::execute`] progresses.
#[derive(Debug, Clone)]
pub struct InstallationStep {
    pub command: String,
    pub description: String,
    pub status: StepStatus,
    pub output: String,
    pub error: String,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub return_code: Option<i32>,
}

impl InstallationStep {
    fn new(command: String, description: String) -> Self {
        Self {
            command,
            description,
            status: StepStatus::Pending,
            output: String::new(),
            error: String::new(),
            start_time: None,
            end_time: None,
            return_code: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallationResult {
    pub success: bool,
    pub steps: Vec<InstallationStep>,
    pub total_duration: Duration,
    pub failed_step: Option<usize>,
    pub error_message: Option<String>,
}

/// One entry in a structured plan, as produced by the interpreter or an
/// LLM-authored installation plan.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanStep {
    pub command: String,
    pub description: Option<String>,
    pub rollback: Option<String>,
}

pub struct InstallationCoordinator {
    steps: Vec<InstallationStep>,
    rollback_commands: Vec<String>,
    timeout: Duration,
    stop_on_error: bool,
    enable_rollback: bool,
}

impl InstallationCoordinator {
    pub fn new(commands: Vec<String>, descriptions: Option<Vec<String>>) -> Result<Self> {
        if let Some(descriptions) = &descriptions {
            if descriptions.len() != commands.len() {
                return Err(Error::InputValidation(
                    "number of descriptions must match number of commands".to_string(),
                ));
            }
        }

        let steps = commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| {
                let description = descriptions
                    .as_ref()
                    .map(|d| d[i].clone())
                    .unwrap_or_else(|| format!("Step {}", i + 1));
                InstallationStep::new(command, description)
            })
            .collect();

        Ok(Self {
            steps,
            rollback_commands: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            stop_on_error: true,
            enable_rollback: false,
        })
    }

    /// Builds a coordinator from a structured plan, collecting `rollback`
    /// entries in plan order so `execute` can run them in reverse on
    /// failure.
    pub fn from_plan(plan: Vec<PlanStep>) -> Result<Self> {
        let mut commands = Vec::with_capacity(plan.len());
        let mut descriptions = Vec::with_capacity(plan.len());
        let mut rollback_commands = Vec::new();

        for (i, step) in plan.into_iter().enumerate() {
            if step.command.is_empty() {
                return Err(Error::InputValidation("each plan step must include a command".to_string()));
            }
            commands.push(step.command);
            descriptions.push(step.description.unwrap_or_else(|| format!("Step {}", i + 1)));
            if let Some(rollback) = step.rollback {
                rollback_commands.push(rollback);
            }
        }

        let enable_rollback = !rollback_commands.is_empty();
        let mut coordinator = Self::new(commands, Some(descriptions))?;
        coordinator.rollback_commands = rollback_commands;
        coordinator.enable_rollback = enable_rollback;
        Ok(coordinator)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_rollback(mut self, enable_rollback: bool) -> Self {
        self.enable_rollback = enable_rollback;
        self
    }

    pub fn add_rollback_command(&mut self, command: impl Into<String>) {
        self.rollback_commands.push(command.into());
    }

    async fn execute_step(step: &mut InstallationStep, timeout: Duration) -> bool {
        step.status = StepStatus::Running;
        step.start_time = Some(Instant::now());

        let output = shell::run(&step.command, timeout).await;
        step.end_time = Some(Instant::now());
        step.return_code = output.exit_code;
        step.output = output.stdout;

        if output.timed_out {
            step.status = StepStatus::Failed;
            step.error = format!("Command timed out after {} seconds", timeout.as_secs());
            return false;
        }

        step.error = output.stderr;
        if output.success {
            step.status = StepStatus::Success;
            true
        } else {
            step.status = StepStatus::Failed;
            false
        }
    }

    async fn rollback(&self) {
        if !self.enable_rollback || self.rollback_commands.is_empty() {
            return;
        }
        tracing::info!("starting rollback");
        for command in self.rollback_commands.iter().rev() {
            let output = shell::run(command, self.timeout).await;
            if !output.success {
                tracing::warn!(command, error = %output.stderr, "rollback command failed");
            }
        }
    }

    /// Runs every step in order. On a failing step with `stop_on_error`
    /// set, marks the remaining steps `Skipped`, runs rollback if
    /// enabled, and returns immediately (spec §4.G). `progress` is invoked
    /// before each step executes, `(current_index, total, step)`.
    pub async fn execute(
        &mut self,
        mut progress: Option<impl FnMut(usize, usize, &InstallationStep)>,
    ) -> InstallationResult {
        let start = Instant::now();
        let total = self.steps.len();
        let mut failed_step_index = None;

        for i in 0..total {
            if let Some(progress) = progress.as_mut() {
                progress(i + 1, total, &self.steps[i]);
            }

            let success = Self::execute_step(&mut self.steps[i], self.timeout).await;

            if !success {
                failed_step_index = Some(i);
                if self.stop_on_error {
                    for step in &mut self.steps[i + 1..] {
                        step.status = StepStatus::Skipped;
                    }
                    if self.enable_rollback {
                        self.rollback().await;
                    }
                    let error_message = if self.steps[i].error.is_empty() {
                        "Command failed".to_string()
                    } else {
                        self.steps[i].error.clone()
                    };
                    return InstallationResult {
                        success: false,
                        steps: self.steps.clone(),
                        total_duration: start.elapsed(),
                        failed_step: Some(i),
                        error_message: Some(error_message),
                    };
                }
            }
        }

        let all_success = self.steps.iter().all(|s| s.status == StepStatus::Success);
        InstallationResult {
            success: all_success,
            steps: self.steps.clone(),
            total_duration: start.elapsed(),
            failed_step: failed_step_index,
            error_message: failed_step_index.map(|i| self.steps[i].error.clone()),
        }
    }

    pub async fn verify_installation(&self, verify_commands: &[String]) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(verify_commands.len());
        for command in verify_commands {
            let output = shell::run(command, Duration::from_secs(VERIFY_TIMEOUT_SECS)).await;
            results.push((command.clone(), output.success));
        }
        results
    }

    pub fn get_summary(&self) -> serde_json::Value {
        let success = self.steps.iter().filter(|s| s.status == StepStatus::Success).count();
        let failed = self.steps.iter().filter(|s| s.status == StepStatus::Failed).count();
        let skipped = self.steps.iter().filter(|s| s.status == StepStatus::Skipped).count();

        serde_json::json!({
            "total_steps": self.steps.len(),
            "success": success,
            "failed": failed,
            "skipped": skipped,
            "steps": self.steps.iter().map(|s| serde_json::json!({
                "command": s.command,
                "description": s.description,
                "status": s.status,
                "duration_ms": s.duration().map(|d| d.as_millis() as u64),
                "return_code": s.return_code,
            })).collect::<Vec<_>>(),
        })
    }

    pub fn export_log(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.get_summary())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_steps_succeed_reports_success() {
        let mut coordinator =
            InstallationCoordinator::new(vec!["true".to_string(), "true".to_string()], None).unwrap();
        let result = coordinator.execute(None::<fn(usize, usize, &InstallationStep)>).await;
        assert!(result.success);
        assert_eq!(result.failed_step, None);
    }

    #[tokio::test]
    async fn stop_on_error_skips_remaining_steps() {
        let mut coordinator = InstallationCoordinator::new(
            vec!["true".to_string(), "exit 1".to_string(), "true".to_string()],
            None,
        )
        .unwrap();
        let result = coordinator.execute(None::<fn(usize, usize, &InstallationStep)>).await;

        assert!(!result.success);
        assert_eq!(result.failed_step, Some(1));
        assert_eq!(result.steps[2].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn rollback_runs_in_reverse_order_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker.txt");

        let plan = vec![
            PlanStep {
                command: format!("echo first >> {}", marker.display()),
                description: None,
                rollback: Some(format!("echo undo-first >> {}", marker.display())),
            },
            PlanStep {
                command: "exit 1".to_string(),
                description: None,
                rollback: Some(format!("echo undo-second >> {}", marker.display())),
            },
        ];

        let mut coordinator = InstallationCoordinator::from_plan(plan).unwrap();
        let result = coordinator.execute(None::<fn(usize, usize, &InstallationStep)>).await;
        assert!(!result.success);

        let contents = std::fs::read_to_string(&marker).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["first", "undo-second", "undo-first"]);
    }

    #[tokio::test]
    async fn progress_callback_runs_before_each_step() {
        let mut seen = Vec::new();
        {
            let mut coordinator =
                InstallationCoordinator::new(vec!["true".to_string(), "true".to_string()], None).unwrap();
            coordinator
                .execute(Some(|current: usize, total: usize, _step: &InstallationStep| {
                    seen.push((current, total));
                }))
                .await;
        }
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }
}

//! Fixed sequential pipeline strategy.
//!
//! Executes a declared role sequence strictly in order, feeding each step's
//! output into the next through template substitution. Unlike the
//! dispatcher, the parent agent keeps its full default capability set; the
//! pipeline is an optional escalation path whose instructions augment the
//! parent's defaults.
//!
//! Step templates may reference two placeholders: `{previous_output}`
//! (the prior step's result text, or the original task for step 0) and
//! `{original_task}` (always the user's initial task, at every step).
//! A failing step halts the run immediately; later steps stay `Idle`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{DispatchOutcome, DriveResult, OrchestrationStrategy, PromptMode, ToolSpec, drive_dispatch};
use crate::error::RegistryError;
use crate::launch::{LaunchOptions, Launcher};
use crate::registry::{RoleProfile, RoleRegistry};
use crate::session_log::{LogEntry, SessionLogger};
use crate::track::{WorkStatus, WorkTracker};

/// Placeholder substituted with the previous step's output text.
pub const PREVIOUS_OUTPUT: &str = "{previous_output}";
/// Placeholder substituted with the user's initial task text.
pub const ORIGINAL_TASK: &str = "{original_task}";

/// One declared pipeline step.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineStep {
    /// Role that executes this step.
    pub role: String,
    /// Task template; see the module docs for placeholders.
    pub template: String,
}

/// Tunables that are not constructor dependencies.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    /// Optional per-step deadline. Absent means no automatic timeout.
    pub deadline: Option<Duration>,
    /// Operator-triggered cancellation; cancelling it kills the in-flight
    /// step and resolves the run with a cancelled result.
    pub cancel: CancellationToken,
    pub logger: Option<SessionLogger>,
}

/// The pipeline strategy. One unit of work per step index.
pub struct Pipeline {
    /// Steps paired with their resolved profiles, in declared order.
    steps: Vec<(PipelineStep, RoleProfile)>,
    tracker: WorkTracker,
    launcher: Launcher,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    logger: Option<SessionLogger>,
}

impl Pipeline {
    /// Resolve every step's role up front so a bad sequence fails here,
    /// before anything launches. Step units register as `Idle`.
    pub fn new(
        registry: &RoleRegistry,
        steps: Vec<PipelineStep>,
        tracker: WorkTracker,
        launcher: Launcher,
        options: PipelineOptions,
    ) -> Result<Self, RegistryError> {
        let mut resolved = Vec::with_capacity(steps.len());
        for step in steps {
            let profile = registry.lookup(&step.role)?;
            resolved.push((step, profile));
        }

        for (index, (step, _)) in resolved.iter().enumerate() {
            tracker.register(&step_unit_id(index, &step.role));
        }

        Ok(Self {
            steps: resolved,
            tracker,
            launcher,
            deadline: options.deadline,
            cancel: options.cancel,
            logger: options.logger,
        })
    }

    /// Execute one `run_pipeline(task)` invocation.
    ///
    /// Resets all step units to `Idle`, then runs steps strictly in
    /// declared order -- step i+1 never starts before step i's completion
    /// future has resolved. Returns the final step's output on success, or
    /// a failure naming the first failing step.
    pub async fn run(&self, task: &str) -> DispatchOutcome {
        // A concurrent re-run would tear state out from under in-flight
        // children; reject it the same way a busy role is rejected.
        if let Some(running) = self
            .tracker
            .snapshot()
            .into_iter()
            .find(|s| s.status == WorkStatus::Running)
        {
            return DispatchOutcome::Busy { role: running.id };
        }

        for (index, (step, _)) in self.steps.iter().enumerate() {
            self.tracker.reset(&step_unit_id(index, &step.role));
        }

        if let Some(logger) = &self.logger {
            logger.log(LogEntry::pipeline_started(
                self.steps.iter().map(|(s, _)| s.role.clone()).collect(),
                task,
            ));
        }
        tracing::info!(steps = self.steps.len(), "Pipeline run started");

        let mut previous = task.to_string();
        for (index, (step, profile)) in self.steps.iter().enumerate() {
            let unit_id = step_unit_id(index, &step.role);
            let resolved_task = step
                .template
                .replace(PREVIOUS_OUTPUT, &previous)
                .replace(ORIGINAL_TASK, task);

            if self.tracker.begin(&unit_id).is_err() {
                return DispatchOutcome::Busy { role: unit_id };
            }
            tracing::info!(step = index, role = %step.role, "Pipeline step started");

            let handle = self
                .launcher
                .launch(profile, &resolved_task, LaunchOptions::default());
            let DriveResult { outcome, timed_out } =
                drive_dispatch(&self.tracker, &unit_id, handle, self.deadline, &self.cancel).await;
            self.tracker.finish(&unit_id, outcome.succeeded);

            if let Some(logger) = &self.logger {
                logger.log(LogEntry::step_finished(
                    index,
                    &step.role,
                    outcome.succeeded,
                    outcome.elapsed_ms,
                ));
            }

            if !outcome.succeeded {
                // Fail fast: remaining steps stay Idle for this run.
                let result = if timed_out {
                    let secs = self.deadline.map(|d| d.as_secs()).unwrap_or(0);
                    DispatchOutcome::Failure(format!(
                        "pipeline halted: step {index} ({}) timed out after {secs}s",
                        step.role
                    ))
                } else if outcome.cancelled {
                    DispatchOutcome::Cancelled
                } else {
                    DispatchOutcome::Failure(step_failure_diagnostic(
                        index,
                        &step.role,
                        &outcome.output,
                    ))
                };
                if let Some(logger) = &self.logger {
                    logger.log(LogEntry::pipeline_finished(&result.to_string()));
                }
                tracing::warn!(step = index, role = %step.role, "Pipeline halted");
                return result;
            }

            previous = outcome.output;
        }

        if let Some(logger) = &self.logger {
            logger.log(LogEntry::pipeline_finished("success"));
        }
        DispatchOutcome::Success(previous)
    }

    pub fn tracker(&self) -> &WorkTracker {
        &self.tracker
    }

    /// Declared step roles, in order.
    pub fn step_roles(&self) -> Vec<String> {
        self.steps.iter().map(|(s, _)| s.role.clone()).collect()
    }
}

impl OrchestrationStrategy for Pipeline {
    fn capability(&self) -> ToolSpec {
        ToolSpec {
            name: "run_pipeline".to_string(),
            description: format!(
                "Run the configured {}-step pipeline ({}) on a task and wait \
                 for the final result. Each step runs as a separate agent \
                 process and receives the previous step's output.",
                self.steps.len(),
                self.step_roles().join(" -> ")
            ),
            schema: json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "string",
                        "description": "The task text for the pipeline"
                    }
                },
                "required": ["task"]
            }),
        }
    }

    fn prompt_mode(&self) -> PromptMode {
        PromptMode::Augment
    }

    fn instructions(&self) -> String {
        format!(
            "\
## Pipeline escalation
Besides your normal capabilities you can call `run_pipeline(task)`, which \
executes a fixed sequence of specialist roles ({}) and returns the final \
result. Prefer the pipeline for substantial multi-stage work that benefits \
from the full sequence; act directly for quick questions and small edits.",
            self.step_roles().join(" -> ")
        )
    }

    fn retain_parent_tools(&self, defaults: Vec<ToolSpec>) -> Vec<ToolSpec> {
        // The parent keeps everything it already had.
        defaults
    }
}

/// Tracker unit id for one step. Includes the index so the same role can
/// appear at two pipeline positions with independent tracking.
pub fn step_unit_id(index: usize, role: &str) -> String {
    format!("step-{index}-{role}")
}

fn step_failure_diagnostic(index: usize, role: &str, output: &str) -> String {
    if output.trim().is_empty() {
        format!("pipeline halted: step {index} ({role}) failed with no output")
    } else {
        format!("pipeline halted: step {index} ({role}) failed: {output}")
    }
}

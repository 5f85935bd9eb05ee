//! On-demand delegation strategy.
//!
//! Exposes exactly one capability to the parent agent -- `delegate(role,
//! task)` -- and strips every other capability for the duration of the
//! session: the parent physically cannot act directly, only delegate. Its
//! instructions are rebuilt from the live role catalog before every turn
//! and fully replace the parent's defaults.
//!
//! Each role keeps a continuation record under the launcher's session
//! directory, so repeated delegations to the same role recall earlier
//! work. The tracker's busy check guarantees the record is never attached
//! to two concurrently running processes.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{DispatchOutcome, DriveResult, OrchestrationStrategy, PromptMode, ToolSpec, drive_dispatch};
use crate::error::RegistryError;
use crate::launch::{LaunchOptions, Launcher};
use crate::registry::RoleRegistry;
use crate::session_log::{LogEntry, SessionLogger};
use crate::track::WorkTracker;

/// Tunables that are not constructor dependencies.
#[derive(Clone, Default)]
pub struct DispatcherOptions {
    /// Optional per-dispatch deadline. Absent means no automatic timeout.
    pub deadline: Option<Duration>,
    /// Operator-triggered cancellation; cancelling it kills the in-flight
    /// child and resolves the dispatch with a cancelled result.
    pub cancel: CancellationToken,
    pub logger: Option<SessionLogger>,
}

/// The delegation strategy. One unit of work per role.
pub struct Dispatcher {
    registry: RoleRegistry,
    tracker: WorkTracker,
    launcher: Launcher,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    logger: Option<SessionLogger>,
}

impl Dispatcher {
    /// Registry, tracker, and launcher are passed explicitly -- no ambient
    /// catalog reads. Every currently known role gets an `Idle` unit.
    pub fn new(
        registry: RoleRegistry,
        tracker: WorkTracker,
        launcher: Launcher,
        options: DispatcherOptions,
    ) -> Self {
        for name in registry.names() {
            tracker.register(&name);
        }
        Self {
            registry,
            tracker,
            launcher,
            deadline: options.deadline,
            cancel: options.cancel,
            logger: options.logger,
        }
    }

    /// Execute one `delegate(role, task)` invocation.
    ///
    /// Resolution order: role lookup (`NotFound` lists valid names), busy
    /// check (synchronous, never queued), launch, await completion, update
    /// the unit, return the collected output as the capability result.
    pub async fn delegate(&self, role: &str, task: &str) -> DispatchOutcome {
        let profile = match self.registry.lookup(role) {
            Ok(profile) => profile,
            Err(RegistryError::RoleNotFound { name, available }) => {
                return DispatchOutcome::NotFound {
                    role: name,
                    available,
                };
            }
            Err(e) => return DispatchOutcome::Failure(e.to_string()),
        };

        // Roles can be registered between turns; make sure a unit exists
        // before taking the busy check.
        self.tracker.register(role);
        if self.tracker.begin(role).is_err() {
            tracing::info!(role, "Rejecting dispatch: role is busy");
            return DispatchOutcome::Busy {
                role: role.to_string(),
            };
        }

        if let Some(logger) = &self.logger {
            logger.log(LogEntry::dispatch_started(role, task));
        }
        tracing::info!(role, "Dispatching task to role");

        let options = LaunchOptions {
            continuation: Some(self.launcher.continuation_path(role)),
        };
        let handle = self.launcher.launch(&profile, task, options);

        let DriveResult { outcome, timed_out } =
            drive_dispatch(&self.tracker, role, handle, self.deadline, &self.cancel).await;
        self.tracker.finish(role, outcome.succeeded);

        let result = if timed_out {
            let secs = self.deadline.map(|d| d.as_secs()).unwrap_or(0);
            DispatchOutcome::Failure(format!("role '{role}' timed out after {secs}s"))
        } else if outcome.cancelled {
            DispatchOutcome::Cancelled
        } else if outcome.succeeded {
            DispatchOutcome::Success(outcome.output)
        } else {
            DispatchOutcome::Failure(child_failure_diagnostic(role, &outcome.output))
        };

        if let Some(logger) = &self.logger {
            logger.log(LogEntry::dispatch_finished(
                role,
                outcome_label(&result),
                outcome.elapsed_ms,
            ));
        }
        result
    }

    pub fn tracker(&self) -> &WorkTracker {
        &self.tracker
    }
}

impl OrchestrationStrategy for Dispatcher {
    fn capability(&self) -> ToolSpec {
        ToolSpec {
            name: "delegate".to_string(),
            description: "Delegate a task to a named role and wait for its result. \
                 The role runs as a separate agent process with its own \
                 restricted capability set."
                .to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "role": {
                        "type": "string",
                        "description": "Name of a registered role"
                    },
                    "task": {
                        "type": "string",
                        "description": "The task text for the role"
                    }
                },
                "required": ["role", "task"]
            }),
        }
    }

    fn prompt_mode(&self) -> PromptMode {
        PromptMode::Replace
    }

    /// Built fresh from the current catalog on every call.
    fn instructions(&self) -> String {
        let mut roles = String::new();
        for profile in self.registry.list() {
            roles.push_str(&format!(
                "- {}: {} (tools: {})\n",
                profile.name,
                profile.description,
                profile.tools.join(", ")
            ));
        }

        format!(
            "\
You are a dispatcher. You cannot read files, run commands, or act \
directly -- your only capability is `delegate(role, task)`, which hands a \
task to one of the roles below and returns its result.

## Available roles
{roles}
Break the operator's request into tasks, delegate each to the most \
suitable role, and compose the results. A busy role must finish its \
current task before it accepts another; delegate to a different role or \
wait rather than repeating the call immediately."
        )
    }

    fn retain_parent_tools(&self, _defaults: Vec<ToolSpec>) -> Vec<ToolSpec> {
        // The parent keeps nothing but the delegate capability itself.
        vec![self.capability()]
    }
}

fn outcome_label(outcome: &DispatchOutcome) -> &'static str {
    match outcome {
        DispatchOutcome::Success(_) => "success",
        DispatchOutcome::Busy { .. } => "busy",
        DispatchOutcome::NotFound { .. } => "not_found",
        DispatchOutcome::Failure(_) => "failure",
        DispatchOutcome::Cancelled => "cancelled",
    }
}

/// Diagnostic for a child that ran and exited non-zero.
fn child_failure_diagnostic(role: &str, output: &str) -> String {
    if output.trim().is_empty() {
        format!("role '{role}' exited with failure and produced no output")
    } else {
        format!("role '{role}' exited with failure: {}", tail(output, 400))
    }
}

/// Last `max_len` characters of `s`, prefixed with "..." if truncated.
fn tail(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let skip = s.chars().count() - max_len;
        format!("...{}", s.chars().skip(skip).collect::<String>())
    } else {
        s.to_string()
    }
}

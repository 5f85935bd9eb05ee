//! Orchestration strategies: how the parent agent reaches child roles.
//!
//! Two strategies exist. The [`dispatcher`] exposes a single `delegate`
//! capability and strips every other capability from the parent agent; its
//! instructions fully replace the parent's defaults and are rebuilt from
//! live registry contents on every turn. The [`pipeline`] exposes a single
//! `run_pipeline` capability, leaves the parent's capability set intact,
//! and augments (never replaces) its instructions.
//!
//! Every recoverable condition -- busy role, unknown role, child failure,
//! cancellation -- is converted into a [`DispatchOutcome`] the parent agent
//! can reason about; nothing here raises into the parent's control flow.

pub mod dispatcher;
pub mod pipeline;

use std::time::Duration;

use serde_json::Value;

use crate::launch::{AgentHandle, LaunchOutcome};
use crate::track::WorkTracker;

/// Declarative description of one capability exposed to the parent agent.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the capability's parameters.
    pub schema: Value,
}

/// How a strategy's instructions combine with the parent's defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptMode {
    /// Strategy instructions fully replace the parent's default prompt.
    Replace,
    /// Strategy instructions are appended to the parent's default prompt.
    Augment,
}

/// Uniform result of one capability invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The dispatch completed; carries the collected output text.
    Success(String),
    /// The target role already has a process running. Never queued.
    Busy { role: String },
    /// No such role; carries the valid names for the parent to relay.
    NotFound { role: String, available: Vec<String> },
    /// The dispatch ran and failed; carries a diagnostic.
    Failure(String),
    /// The dispatch was terminated by the operator.
    Cancelled,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success(_))
    }
}

impl std::fmt::Display for DispatchOutcome {
    /// The textual capability result handed back to the parent agent.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Success(text) => write!(f, "{text}"),
            DispatchOutcome::Busy { role } => {
                write!(f, "role '{role}' is busy with an earlier task; try again once it finishes")
            }
            DispatchOutcome::NotFound { role, available } => {
                write!(f, "no role named '{role}'; available roles: {}", available.join(", "))
            }
            DispatchOutcome::Failure(diagnostic) => write!(f, "{diagnostic}"),
            DispatchOutcome::Cancelled => write!(f, "dispatch was cancelled by the operator"),
        }
    }
}

/// The seam between a strategy and the host agent's capability plumbing.
///
/// The host reads these once per turn: which single capability to register,
/// how to combine instructions with its defaults, and which of its default
/// tools survive while the strategy is active.
pub trait OrchestrationStrategy {
    /// The one capability this strategy exposes to the parent agent.
    fn capability(&self) -> ToolSpec;

    /// Whether `instructions` replaces or augments the parent's defaults.
    fn prompt_mode(&self) -> PromptMode;

    /// Guiding instructions, rebuilt from current state on every call --
    /// the role catalog can change between turns.
    fn instructions(&self) -> String;

    /// Filter the parent's default tools for the duration of the strategy.
    fn retain_parent_tools(&self, defaults: Vec<ToolSpec>) -> Vec<ToolSpec>;
}

/// Result of driving one dispatch to completion.
pub(crate) struct DriveResult {
    pub outcome: LaunchOutcome,
    pub timed_out: bool,
}

/// Pump a handle's progress events into the tracker until the stream ends,
/// then await the completion slot. Enforces the optional per-dispatch
/// deadline and the operator's cancel token by killing the child and
/// letting the normal cancellation path resolve the slot.
pub(crate) async fn drive_dispatch(
    tracker: &WorkTracker,
    unit_id: &str,
    mut handle: AgentHandle,
    deadline: Option<Duration>,
    cancel: &tokio_util::sync::CancellationToken,
) -> DriveResult {
    let mut events = match handle.take_events() {
        Some(events) => events,
        // Only reachable if a caller already drained the handle; treat the
        // dispatch as event-free and fall through to the completion slot.
        None => {
            let outcome = handle.wait().await;
            return DriveResult {
                outcome,
                timed_out: false,
            };
        }
    };

    let timeout_at = deadline.map(|d| tokio::time::Instant::now() + d);
    let mut timed_out = false;
    let mut kill_sent = false;

    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(event) => tracker.observe(unit_id, &event),
                None => break,
            },
            _ = sleep_until_opt(timeout_at), if timeout_at.is_some() && !kill_sent => {
                timed_out = true;
                kill_sent = true;
                tracing::warn!(unit = unit_id, "Dispatch deadline exceeded, killing child");
                handle.kill();
                // Keep draining: the kill path flushes the decoder and
                // closes the event stream.
            }
            _ = cancel.cancelled(), if !kill_sent => {
                kill_sent = true;
                tracing::warn!(unit = unit_id, "Dispatch cancelled by operator, killing child");
                handle.kill();
            }
        }
    }

    let outcome = handle.wait().await;
    DriveResult { outcome, timed_out }
}

async fn sleep_until_opt(at: Option<tokio::time::Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

//! Child agent process launcher.
//!
//! [`Launcher::launch`] starts one child agent process for a role/task pair
//! and returns an [`AgentHandle`]: a progress-event receiver plus a
//! completion slot that resolves exactly once -- on success, failure, spawn
//! error, or cancellation. Launching never fails synchronously; if the
//! process cannot start at all, the completion slot resolves immediately
//! with `succeeded = false` and a diagnostic, so callers always await one
//! uniform result shape.
//!
//! The spawned process:
//! - Runs in its own process group (`process_group(0)`) for clean shutdown
//! - Has `kill_on_drop(true)` as a safety net
//! - Respects a [`CancellationToken`]; cancelling SIGKILLs the process
//!   group, reaps the child, flushes the decoder, and resolves the
//!   completion slot with a cancelled outcome
//!
//! Stdout is consumed in raw chunks and fed through a [`StreamDecoder`];
//! stderr is diagnostic-only and is forwarded to tracing, never parsed.

pub mod command;

use std::path::PathBuf;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decode::{ProgressEvent, StreamDecoder};
use crate::registry::RoleProfile;

/// Settings the launcher needs for every child.
#[derive(Clone, Debug)]
pub struct LauncherConfig {
    /// Path to the child agent CLI binary.
    pub binary: PathBuf,
    /// Engine/model identifier passed to every child (inherited from the
    /// parent session or a configured fallback).
    pub model: String,
    /// Directory holding per-role continuation records.
    pub session_dir: PathBuf,
}

/// Per-launch options.
#[derive(Clone, Debug, Default)]
pub struct LaunchOptions {
    /// Conversation record path for the role's continuation channel. When
    /// set and the record exists, the child starts in continue mode.
    pub continuation: Option<PathBuf>,
}

/// Final result of one launch, delivered through the completion slot.
#[derive(Clone, Debug)]
pub struct LaunchOutcome {
    /// Collected output text (concatenated text fragments).
    pub output: String,
    /// True when the process ran to completion with a zero exit status.
    pub succeeded: bool,
    /// True when the launch was terminated through [`AgentHandle::kill`].
    pub cancelled: bool,
    /// Wall-clock duration of the launch in milliseconds.
    pub elapsed_ms: u64,
}

/// Handle to one in-flight child agent process.
///
/// Owned by the launching strategy for the lifetime of the dispatch and
/// destroyed once the result has been delivered.
pub struct AgentHandle {
    /// Correlation id for logs.
    pub id: String,
    started_at: Instant,
    events: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    completion: oneshot::Receiver<LaunchOutcome>,
    cancel_token: CancellationToken,
}

impl AgentHandle {
    /// Take the progress-event receiver. The stream ends (receiver yields
    /// `None`) when the child's output is fully decoded, after which
    /// [`AgentHandle::wait`] resolves without further suspension.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressEvent>> {
        self.events.take()
    }

    /// Request termination. The monitor task kills the process group and
    /// resolves the completion slot with a cancelled outcome.
    pub fn kill(&self) {
        self.cancel_token.cancel();
    }

    /// Token observed by the monitor task; cancelling it is equivalent to
    /// [`AgentHandle::kill`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Await the completion slot. Resolves exactly once per launch.
    pub async fn wait(self) -> LaunchOutcome {
        match self.completion.await {
            Ok(outcome) => outcome,
            // The monitor task can only disappear without reporting if it
            // panicked; surface that as an ordinary failure.
            Err(_) => LaunchOutcome {
                output: "agent monitor exited without reporting a result".to_string(),
                succeeded: false,
                cancelled: false,
                elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            },
        }
    }
}

/// Spawns and supervises child agent processes.
#[derive(Clone)]
pub struct Launcher {
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Continuation record path for a role, under the configured session
    /// directory.
    pub fn continuation_path(&self, role: &str) -> PathBuf {
        self.config.session_dir.join(format!("{role}.session"))
    }

    /// Launch one child agent process.
    ///
    /// Returns immediately with a handle; spawning happens on the monitor
    /// task so that spawn errors are delivered through the completion slot
    /// like every other outcome.
    pub fn launch(&self, profile: &RoleProfile, task: &str, options: LaunchOptions) -> AgentHandle {
        let id = Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();

        let monitor = Monitor {
            id: id.clone(),
            config: self.config.clone(),
            profile: profile.clone(),
            task: task.to_string(),
            continuation: options.continuation,
            event_tx,
            cancel_token: cancel_token.clone(),
        };
        tokio::spawn(monitor.run(done_tx));

        AgentHandle {
            id,
            started_at: Instant::now(),
            events: Some(event_rx),
            completion: done_rx,
            cancel_token,
        }
    }
}

/// State moved onto the per-launch monitor task.
struct Monitor {
    id: String,
    config: LauncherConfig,
    profile: RoleProfile,
    task: String,
    continuation: Option<PathBuf>,
    event_tx: mpsc::UnboundedSender<ProgressEvent>,
    cancel_token: CancellationToken,
}

impl Monitor {
    /// Supervise one child from spawn to completion-slot resolution.
    /// Every exit path sends exactly one outcome on `done_tx`.
    async fn run(self, done_tx: oneshot::Sender<LaunchOutcome>) {
        let started = Instant::now();
        let outcome = self.supervise(started).await;
        tracing::debug!(
            launch_id = %self.id,
            succeeded = outcome.succeeded,
            cancelled = outcome.cancelled,
            elapsed_ms = outcome.elapsed_ms,
            "Launch finished"
        );
        let _ = done_tx.send(outcome);
    }

    async fn supervise(&self, started: Instant) -> LaunchOutcome {
        if let Some(record) = &self.continuation {
            if let Some(parent) = record.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        let mut cmd = command::build_command(
            &self.config,
            &self.profile,
            &self.task,
            self.continuation.as_deref(),
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    launch_id = %self.id,
                    binary = %self.config.binary.display(),
                    "Failed to spawn agent process: {e}"
                );
                return LaunchOutcome {
                    output: format!(
                        "failed to start agent process `{}`: {e}",
                        self.config.binary.display()
                    ),
                    succeeded: false,
                    cancelled: false,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        tracing::info!(
            launch_id = %self.id,
            role = %self.profile.name,
            pid = child.id().unwrap_or(0),
            "Agent process started"
        );

        // Stderr is diagnostic-only; forward lines to tracing.
        if let Some(stderr) = child.stderr.take() {
            let id = self.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "foreman::child", launch_id = %id, "{line}");
                }
            });
        }

        let mut decoder = StreamDecoder::new();
        let mut collected = String::new();
        let mut cancelled = false;

        match child.stdout.take() {
            Some(mut stdout) => {
                let mut buf = [0u8; 4096];
                loop {
                    tokio::select! {
                        read = stdout.read(&mut buf) => match read {
                            Ok(0) => break,
                            Ok(n) => {
                                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                                for event in decoder.push(&chunk) {
                                    self.forward(event, &mut collected);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(launch_id = %self.id, "Stdout read error: {e}");
                                break;
                            }
                        },
                        _ = self.cancel_token.cancelled() => {
                            cancelled = true;
                            kill_process_group(&child);
                            break;
                        }
                    }
                }
            }
            None => {
                tracing::warn!(launch_id = %self.id, "Agent process has no stdout pipe");
                kill_process_group(&child);
            }
        }

        // Stream ended (or was cut): give the buffered remainder one last
        // parse attempt so the decoder finalizes either way.
        if let Some(event) = decoder.finish() {
            self.forward(event, &mut collected);
        }

        // Reap the child to prevent zombies.
        let status = child.wait().await;
        let succeeded = !cancelled && status.map(|s| s.success()).unwrap_or(false);

        LaunchOutcome {
            output: collected,
            succeeded,
            cancelled,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn forward(&self, event: ProgressEvent, collected: &mut String) {
        if let ProgressEvent::Text(delta) = &event {
            collected.push_str(delta);
        }
        // Receiver may already be gone; the outcome still carries the text.
        let _ = self.event_tx.send(event);
    }
}

/// SIGKILL the child's entire process group.
fn kill_process_group(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let pgid = nix::unistd::Pid::from_raw(pid as i32);
        let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable stub agent script into `dir`.
    fn stub_agent(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("agent");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        file.write_all(body.as_bytes()).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn launcher_for(binary: PathBuf, dir: &std::path::Path) -> Launcher {
        Launcher::new(LauncherConfig {
            binary,
            model: "test-model".to_string(),
            session_dir: dir.join("sessions"),
        })
    }

    fn profile() -> RoleProfile {
        RoleProfile {
            name: "scout".to_string(),
            description: "scout".to_string(),
            tools: vec!["file_read".to_string()],
            instructions: "look around".to_string(),
            replace_prompt: false,
        }
    }

    #[tokio::test]
    async fn missing_binary_resolves_with_failure_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher_for(dir.path().join("no-such-binary"), dir.path());

        let handle = launcher.launch(&profile(), "task", LaunchOptions::default());
        let outcome = handle.wait().await;

        assert!(!outcome.succeeded);
        assert!(!outcome.cancelled);
        assert!(outcome.output.contains("failed to start"));
    }

    #[tokio::test]
    async fn events_and_outcome_from_stub_agent() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_agent(
            dir.path(),
            r#"printf '{"type":"text","delta":"hello "}\n'
printf '{"type":"tool_start","name":"grep"}\n'
printf '{"type":"text","delta":"world"}\n'
printf '{"type":"done","exit_code":0}\n'
"#,
        );
        let launcher = launcher_for(binary, dir.path());

        let mut handle = launcher.launch(&profile(), "task", LaunchOptions::default());
        let mut events = handle.take_events().unwrap();

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        let outcome = handle.wait().await;

        assert_eq!(
            seen,
            vec![
                ProgressEvent::Text("hello ".to_string()),
                ProgressEvent::ToolStart("grep".to_string()),
                ProgressEvent::Text("world".to_string()),
                ProgressEvent::Completed { exit_code: 0 },
            ]
        );
        assert!(outcome.succeeded);
        assert_eq!(outcome.output, "hello world");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_failure_with_collected_text() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_agent(
            dir.path(),
            r#"printf '{"type":"text","delta":"partial"}\n'
exit 3
"#,
        );
        let launcher = launcher_for(binary, dir.path());

        let outcome = launcher
            .launch(&profile(), "task", LaunchOptions::default())
            .wait()
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.output, "partial");
    }

    #[tokio::test]
    async fn kill_resolves_with_cancelled_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_agent(
            dir.path(),
            r#"printf '{"type":"text","delta":"before sleep"}\n'
sleep 30
printf '{"type":"text","delta":"after sleep"}\n'
"#,
        );
        let launcher = launcher_for(binary, dir.path());

        let mut handle = launcher.launch(&profile(), "task", LaunchOptions::default());
        let mut events = handle.take_events().unwrap();

        // Wait for the first event so the child is definitely running.
        let first = events.recv().await.unwrap();
        assert_eq!(first, ProgressEvent::Text("before sleep".to_string()));

        handle.kill();
        while events.recv().await.is_some() {}
        let outcome = handle.wait().await;

        assert!(outcome.cancelled);
        assert!(!outcome.succeeded);
        assert!(outcome.output.contains("before sleep"));
        assert!(!outcome.output.contains("after sleep"));
    }

    #[tokio::test]
    async fn diagnostic_stdout_yields_empty_output_but_exit_status_rules() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_agent(dir.path(), "echo 'plain diagnostic, not a record'\n");
        let launcher = launcher_for(binary, dir.path());

        let outcome = launcher
            .launch(&profile(), "task", LaunchOptions::default())
            .wait()
            .await;

        assert!(outcome.succeeded);
        assert!(outcome.output.is_empty());
    }
}

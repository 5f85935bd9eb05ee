use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use foreman::launch::{Launcher, LauncherConfig};
use foreman::registry::{RoleProfile, RoleRegistry};
use foreman::strategy::DispatchOutcome;
use foreman::strategy::pipeline::{Pipeline, PipelineOptions, PipelineStep};
use foreman::track::{WorkStatus, WorkTracker};

fn setup_workspace() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

/// Write an executable stub agent script into the workspace.
fn stub_agent(ws: &Path, body: &str) -> PathBuf {
    let path = ws.join("agent");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stub that wraps its task (the final positional argument) in `W[..]`.
/// Chained steps therefore produce visibly nested output.
fn wrap_agent(ws: &Path) -> PathBuf {
    stub_agent(
        ws,
        r#"for arg; do task="$arg"; done
printf '{"type":"text","delta":"W[%s]"}\n' "$task"
printf '{"type":"done","exit_code":0}\n'
"#,
    )
}

fn profile(name: &str) -> RoleProfile {
    RoleProfile {
        name: name.to_string(),
        description: format!("{name} role"),
        tools: vec![],
        instructions: "do the step".to_string(),
        replace_prompt: false,
    }
}

fn step(role: &str, template: &str) -> PipelineStep {
    PipelineStep {
        role: role.to_string(),
        template: template.to_string(),
    }
}

fn pipeline(
    ws: &Path,
    binary: PathBuf,
    roles: &[&str],
    steps: Vec<PipelineStep>,
) -> (Pipeline, WorkTracker) {
    let registry = RoleRegistry::from_profiles(roles.iter().map(|r| profile(r))).unwrap();
    let launcher = Launcher::new(LauncherConfig {
        binary,
        model: "test-model".to_string(),
        session_dir: ws.join("sessions"),
    });
    let tracker = WorkTracker::new();
    let pipeline = Pipeline::new(
        &registry,
        steps,
        tracker.clone(),
        launcher,
        PipelineOptions::default(),
    )
    .unwrap();
    (pipeline, tracker)
}

// ============================================================
// Substitution
// ============================================================

#[tokio::test]
async fn test_first_step_previous_output_is_original_task() {
    let ws = setup_workspace();
    let binary = wrap_agent(ws.path());
    let (pipeline, _) = pipeline(
        ws.path(),
        binary,
        &["planner"],
        vec![step("planner", "prev=<{previous_output}>")],
    );

    let outcome = pipeline.run("build a parser").await;
    assert_eq!(
        outcome,
        DispatchOutcome::Success("W[prev=<build a parser>]".to_string())
    );
}

#[tokio::test]
async fn test_every_step_sees_the_original_task() {
    let ws = setup_workspace();
    let binary = wrap_agent(ws.path());
    let (pipeline, _) = pipeline(
        ws.path(),
        binary,
        &["planner", "builder"],
        vec![
            step("planner", "{previous_output}"),
            step("builder", "{previous_output}|orig={original_task}"),
        ],
    );

    let outcome = pipeline.run("T").await;
    // Step 0: task "T" -> "W[T]". Step 1: task "W[T]|orig=T" -> wrapped.
    assert_eq!(
        outcome,
        DispatchOutcome::Success("W[W[T]|orig=T]".to_string())
    );
}

// ============================================================
// Strict sequencing
// ============================================================

#[tokio::test]
async fn test_steps_run_strictly_in_declared_order() {
    let ws = setup_workspace();
    let trace = ws.path().join("trace.log");
    // Each child logs start and end markers around a small delay; overlap
    // would interleave the markers.
    let binary = stub_agent(
        ws.path(),
        &format!(
            r#"for arg; do task="$arg"; done
echo "start:$task" >> {trace}
sleep 1
echo "end:$task" >> {trace}
printf '{{"type":"done","exit_code":0}}\n'
"#,
            trace = trace.display()
        ),
    );
    let (pipeline, _) = pipeline(
        ws.path(),
        binary,
        &["planner", "builder"],
        vec![step("planner", "A"), step("builder", "B")],
    );

    let outcome = pipeline.run("task").await;
    assert!(outcome.is_success());

    let contents = std::fs::read_to_string(&trace).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec!["start:A", "end:A", "start:B", "end:B"]);
}

// ============================================================
// Scenario B: fail-fast
// ============================================================

#[tokio::test]
async fn test_failing_step_halts_run_and_names_step() {
    let ws = setup_workspace();
    let ran = ws.path().join("ran.log");
    let binary = stub_agent(
        ws.path(),
        &format!(
            r#"for arg; do task="$arg"; done
case "$task" in
  *boom*)
    printf '{{"type":"text","delta":"exploding"}}\n'
    exit 1
    ;;
esac
echo "ran:$task" >> {ran}
printf '{{"type":"done","exit_code":0}}\n'
"#,
            ran = ran.display()
        ),
    );
    let (pipeline, tracker) = pipeline(
        ws.path(),
        binary,
        &["planner", "builder"],
        vec![step("planner", "boom {original_task}"), step("builder", "B")],
    );

    let outcome = pipeline.run("task").await;
    match outcome {
        DispatchOutcome::Failure(diagnostic) => {
            assert!(diagnostic.contains("step 0"), "got: {diagnostic}");
            assert!(diagnostic.contains("planner"), "got: {diagnostic}");
            assert!(diagnostic.contains("exploding"), "got: {diagnostic}");
        }
        other => panic!("Expected Failure, got: {other:?}"),
    }

    // The failing step is Error; the later step never started.
    assert_eq!(
        tracker.snapshot_of("step-0-planner").unwrap().status,
        WorkStatus::Error
    );
    assert_eq!(
        tracker.snapshot_of("step-1-builder").unwrap().status,
        WorkStatus::Idle
    );
    assert!(!ran.exists(), "step 1 must not have run");
}

// ============================================================
// Re-run
// ============================================================

#[tokio::test]
async fn test_rerun_resets_step_units_and_succeeds() {
    let ws = setup_workspace();
    let flag = ws.path().join("fail-once");
    std::fs::write(&flag, "x").unwrap();
    // Fails while the flag file exists, then consumes it.
    let binary = stub_agent(
        ws.path(),
        &format!(
            r#"for arg; do task="$arg"; done
if [ -f {flag} ]; then
  rm -f {flag}
  exit 1
fi
printf '{{"type":"text","delta":"ok:%s"}}\n' "$task"
printf '{{"type":"done","exit_code":0}}\n'
"#,
            flag = flag.display()
        ),
    );
    let (pipeline, tracker) = pipeline(
        ws.path(),
        binary,
        &["planner", "builder"],
        vec![
            step("planner", "{original_task}"),
            step("builder", "{previous_output}"),
        ],
    );

    let first = pipeline.run("task").await;
    assert!(matches!(first, DispatchOutcome::Failure(_)));
    assert_eq!(
        tracker.snapshot_of("step-0-planner").unwrap().status,
        WorkStatus::Error
    );

    let second = pipeline.run("task").await;
    assert_eq!(
        second,
        DispatchOutcome::Success("ok:ok:task".to_string())
    );
    for snap in tracker.snapshot() {
        assert_eq!(snap.status, WorkStatus::Done);
    }
}

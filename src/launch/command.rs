//! Child invocation contract.
//!
//! Builds the argv for one child agent process. The contract, in order:
//! the engine/model identifier, the explicit minimal tool list, a flag
//! suppressing extension loading inside the child (prevents uncontrolled
//! recursive spawning), streamed-output selection, the role instructions
//! (appended to or fully replacing the child's defaults), optional
//! continuation record + continue flag, and the task text as the final
//! positional argument.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::LauncherConfig;
use crate::registry::RoleProfile;

/// Build the ready-to-spawn command for one dispatch.
///
/// `continuation` is the role's conversation record path, if a channel was
/// requested. The continue flag is added only when the record already
/// exists -- a fresh channel starts a new conversation that the child
/// persists at that path.
pub(super) fn build_command(
    config: &LauncherConfig,
    profile: &RoleProfile,
    task: &str,
    continuation: Option<&Path>,
) -> Command {
    let mut cmd = Command::new(&config.binary);

    cmd.arg("--model").arg(&config.model);
    cmd.arg("--tools").arg(profile.tools.join(","));
    cmd.arg("--no-extensions");
    cmd.arg("--output").arg("stream");

    if profile.replace_prompt {
        cmd.arg("--instructions").arg(&profile.instructions);
    } else {
        cmd.arg("--append-instructions").arg(&profile.instructions);
    }

    if let Some(record) = continuation {
        cmd.arg("--session").arg(record);
        if record.exists() {
            cmd.arg("--continue");
        }
    }

    cmd.arg(task);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config() -> LauncherConfig {
        LauncherConfig {
            binary: PathBuf::from("/usr/local/bin/agent"),
            model: "sonnet-4".to_string(),
            session_dir: PathBuf::from("/tmp/sessions"),
        }
    }

    fn test_profile(replace: bool) -> RoleProfile {
        RoleProfile {
            name: "scout".to_string(),
            description: "read-only explorer".to_string(),
            tools: vec!["file_read".to_string(), "grep".to_string()],
            instructions: "only look, never touch".to_string(),
            replace_prompt: replace,
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn task_is_final_positional_argument() {
        let cmd = build_command(&test_config(), &test_profile(false), "summarize X", None);
        let args = args_of(&cmd);
        assert_eq!(args.last().map(String::as_str), Some("summarize X"));
    }

    #[test]
    fn contract_carries_model_tools_and_extension_suppression() {
        let cmd = build_command(&test_config(), &test_profile(false), "t", None);
        let args = args_of(&cmd);

        let model_at = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_at + 1], "sonnet-4");

        let tools_at = args.iter().position(|a| a == "--tools").unwrap();
        assert_eq!(args[tools_at + 1], "file_read,grep");

        assert!(args.contains(&"--no-extensions".to_string()));
    }

    #[test]
    fn instructions_append_by_default_replace_when_flagged() {
        let append = args_of(&build_command(&test_config(), &test_profile(false), "t", None));
        assert!(append.contains(&"--append-instructions".to_string()));
        assert!(!append.contains(&"--instructions".to_string()));

        let replace = args_of(&build_command(&test_config(), &test_profile(true), "t", None));
        assert!(replace.contains(&"--instructions".to_string()));
        assert!(!replace.contains(&"--append-instructions".to_string()));
    }

    #[test]
    fn continuation_adds_continue_only_for_existing_record() {
        let dir = tempfile::tempdir().unwrap();

        let fresh = dir.path().join("scout.session");
        let args = args_of(&build_command(
            &test_config(),
            &test_profile(false),
            "t",
            Some(&fresh),
        ));
        assert!(args.contains(&"--session".to_string()));
        assert!(!args.contains(&"--continue".to_string()));

        std::fs::write(&fresh, "{}").unwrap();
        let args = args_of(&build_command(
            &test_config(),
            &test_profile(false),
            "t",
            Some(&fresh),
        ));
        assert!(args.contains(&"--continue".to_string()));
    }

    #[test]
    fn no_continuation_flags_without_channel() {
        let args = args_of(&build_command(&test_config(), &test_profile(false), "t", None));
        assert!(!args.contains(&"--session".to_string()));
        assert!(!args.contains(&"--continue".to_string()));
    }
}

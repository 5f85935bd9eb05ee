pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use anyhow::Context;
use std::path::Path;

/// Load configuration by merging global, workspace, and CLI sources.
/// Precedence: CLI > workspace config > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/foreman/foreman.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Workspace config -- an explicit --config path wins over
    // ./foreman.toml in the working directory. A missing or malformed
    // explicit path is a hard error; the implicit one is optional.
    let workspace = match &cli.config {
        Some(path) => load_explicit_file(path)?,
        None => load_toml_file(Path::new("foreman.toml")).unwrap_or_default(),
    };

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > workspace > global > defaults
    let config = cli_partial
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(path) => load_toml_file(&path).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load a config file the operator named explicitly. Unlike the implicit
/// search locations, failures here propagate.
fn load_explicit_file(path: &Path) -> Result<PartialConfig, crate::error::ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config_file: ConfigFile =
        toml::from_str(&contents).map_err(|e| crate::error::ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config_file.to_partial())
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse errors are logged and skipped.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            match toml::from_str::<ConfigFile>(&contents)
                .context(format!("Failed to parse {}", path.display()))
            {
                Ok(config_file) => {
                    tracing::info!("Loaded config from {}", path.display());
                    Some(config_file.to_partial())
                }
                Err(e) => {
                    tracing::warn!("Config parse error: {:#}", e);
                    None
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/foreman/foreman.toml
/// macOS: ~/Library/Application Support/foreman/foreman.toml
fn global_config_path() -> Option<std::path::PathBuf> {
    directories::ProjectDirs::from("", "", "foreman")
        .map(|dirs| dirs.config_dir().join("foreman.toml"))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    PartialConfig {
        agent_binary: cli.agent_binary.clone(),
        model: cli.model.clone(),
        deadline_secs: cli.deadline,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn workspace_file_parses_profiles_and_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreman.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[general]
agent_binary = "/usr/local/bin/agent"
model = "sonnet"
deadline_secs = 120

[[profiles]]
name = "scout"
description = "read-only explorer"
tools = ["file_read", "grep"]
instructions = "only look, never touch"

[[profiles]]
name = "builder"
description = "makes changes"
tools = ["file_read", "file_write", "shell_exec"]
instructions = "build what the task asks"
replace_prompt = true

[[pipeline.steps]]
role = "scout"
template = "Survey relevant code for: {{original_task}}"

[[pipeline.steps]]
role = "builder"
template = "Using this survey:\n{{previous_output}}\n\nImplement: {{original_task}}"
"#
        )
        .unwrap();

        let partial = load_toml_file(&path).unwrap();
        let config = partial.finalize();

        assert_eq!(config.model, "sonnet");
        assert_eq!(config.deadline_secs, Some(120));
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.profiles[0].name, "scout");
        assert!(!config.profiles[0].replace_prompt);
        assert!(config.profiles[1].replace_prompt);
        assert_eq!(config.pipeline_steps.len(), 2);
        assert_eq!(config.pipeline_steps[1].role, "builder");
    }

    #[test]
    fn missing_file_yields_no_partial() {
        assert!(load_toml_file(Path::new("/definitely/not/here.toml")).is_none());
    }

    #[test]
    fn explicit_config_failures_propagate() {
        assert!(load_explicit_file(Path::new("/definitely/not/here.toml")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load_explicit_file(&path).is_err());
    }
}

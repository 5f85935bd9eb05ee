use super::schema::{AppConfig, PartialConfig};
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For profiles and pipeline steps: REPLACE semantics (if self has
    /// Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            agent_binary: self.agent_binary.or(fallback.agent_binary),
            model: self.model.or(fallback.model),
            session_dir: self.session_dir.or(fallback.session_dir),
            deadline_secs: self.deadline_secs.or(fallback.deadline_secs),
            profiles: self.profiles.or(fallback.profiles),
            pipeline_steps: self.pipeline_steps.or(fallback.pipeline_steps),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        AppConfig {
            agent_binary: self.agent_binary.unwrap_or_else(|| PathBuf::from("agent")),
            model: self.model.unwrap_or_else(|| "sonnet".to_string()),
            session_dir: self
                .session_dir
                .unwrap_or_else(|| PathBuf::from(".foreman/sessions")),
            deadline_secs: self.deadline_secs,
            profiles: self.profiles.unwrap_or_default(),
            pipeline_steps: self.pipeline_steps.unwrap_or_default(),
        }
    }
}

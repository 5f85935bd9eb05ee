use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::launch::LauncherConfig;
use crate::registry::RoleProfile;
use crate::strategy::pipeline::PipelineStep;

/// The TOML file structure for foreman.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    /// Role profiles, pre-parsed by serde. If specified, fully replaces
    /// any lower-priority profile list.
    pub profiles: Option<Vec<RoleProfile>>,
    pub pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub agent_binary: Option<PathBuf>,
    pub model: Option<String>,
    pub session_dir: Option<PathBuf>,
    /// Per-dispatch deadline in seconds. Omit for no automatic timeout.
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// If specified, fully replaces any lower-priority step list.
    pub steps: Option<Vec<PipelineStep>>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent_binary: PathBuf,
    pub model: String,
    pub session_dir: PathBuf,
    pub deadline_secs: Option<u64>,
    pub profiles: Vec<RoleProfile>,
    pub pipeline_steps: Vec<PipelineStep>,
}

impl AppConfig {
    /// The launcher's slice of the configuration.
    pub fn launcher_config(&self) -> LauncherConfig {
        LauncherConfig {
            binary: self.agent_binary.clone(),
            model: self.model.clone(),
            session_dir: self.session_dir.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Clone, Debug, Default)]
pub struct PartialConfig {
    pub agent_binary: Option<PathBuf>,
    pub model: Option<String>,
    pub session_dir: Option<PathBuf>,
    pub deadline_secs: Option<u64>,
    pub profiles: Option<Vec<RoleProfile>>,
    pub pipeline_steps: Option<Vec<PipelineStep>>,
}

impl ConfigFile {
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general;
        PartialConfig {
            agent_binary: general.as_ref().and_then(|g| g.agent_binary.clone()),
            model: general.as_ref().and_then(|g| g.model.clone()),
            session_dir: general.as_ref().and_then(|g| g.session_dir.clone()),
            deadline_secs: general.as_ref().and_then(|g| g.deadline_secs),
            profiles: self.profiles,
            pipeline_steps: self.pipeline.and_then(|p| p.steps),
        }
    }
}

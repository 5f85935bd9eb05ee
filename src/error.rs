use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("No pipeline configured: add [[pipeline.steps]] to foreman.toml")]
    PipelineNotConfigured,
}

/// Errors related to the role registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Role '{name}' is already registered")]
    DuplicateRole { name: String },

    #[error("Role '{name}' not found (available: {})", available.join(", "))]
    RoleNotFound {
        name: String,
        available: Vec<String>,
    },
}

/// Errors related to unit-of-work state transitions.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("Unit '{id}' is already running")]
    AlreadyRunning { id: String },

    #[error("Unit '{id}' is not tracked")]
    UnknownUnit { id: String },
}

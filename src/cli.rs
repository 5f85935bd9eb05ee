use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "Agent-process orchestration harness")]
pub struct Cli {
    /// Path to config file (overrides ./foreman.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Child agent CLI binary
    #[arg(long, global = true)]
    pub agent_binary: Option<PathBuf>,

    /// Model identifier passed to every child
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Per-dispatch deadline in seconds
    #[arg(long, global = true)]
    pub deadline: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered roles
    Roles,

    /// Delegate one task to a named role and print its result
    Delegate {
        /// Role name
        #[arg(short, long)]
        role: String,

        /// Task text for the role
        task: String,
    },

    /// Run the configured pipeline on a task and print the final result
    Pipeline {
        /// Task text for the pipeline
        task: String,
    },
}

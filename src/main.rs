use std::future::Future;
use std::path::Path;
use std::pin::pin;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use foreman::cli::{Cli, Commands};
use foreman::config;
use foreman::error::ConfigError;
use foreman::launch::Launcher;
use foreman::project;
use foreman::registry::RoleRegistry;
use foreman::session_log::{LogEntry, SessionLogger};
use foreman::strategy::DispatchOutcome;
use foreman::strategy::dispatcher::{Dispatcher, DispatcherOptions};
use foreman::strategy::pipeline::{Pipeline, PipelineOptions};
use foreman::track::WorkTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Stderr only -- stdout carries dispatch results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::info!(
        model = %config.model,
        agent_binary = %config.agent_binary.display(),
        roles = config.profiles.len(),
        "Foreman starting"
    );

    let registry = RoleRegistry::from_profiles(config.profiles.clone())?;

    match &cli.command {
        Commands::Roles => {
            if registry.is_empty() {
                println!("No roles configured. Add [[profiles]] to foreman.toml.");
                return Ok(());
            }
            for profile in registry.list() {
                println!(
                    "{:<12} {} (tools: {})",
                    profile.name,
                    profile.description,
                    profile.tools.join(", ")
                );
            }
            Ok(())
        }

        Commands::Delegate { role, task } => {
            let logger = session_logger();
            if let Some(logger) = &logger {
                logger.log(LogEntry::session_start(&config.model, registry.names()));
            }

            let tracker = WorkTracker::new();
            let dispatcher = Dispatcher::new(
                registry,
                tracker.clone(),
                Launcher::new(config.launcher_config()),
                DispatcherOptions {
                    deadline: config.deadline(),
                    cancel: cancel_on_interrupt(),
                    logger,
                },
            );

            let outcome =
                run_with_status(dispatcher.delegate(role, task), &tracker, false).await;
            finish(outcome)
        }

        Commands::Pipeline { task } => {
            if config.pipeline_steps.is_empty() {
                return Err(ConfigError::PipelineNotConfigured.into());
            }

            let logger = session_logger();
            if let Some(logger) = &logger {
                logger.log(LogEntry::session_start(&config.model, registry.names()));
            }

            let tracker = WorkTracker::new();
            let pipeline = Pipeline::new(
                &registry,
                config.pipeline_steps.clone(),
                tracker.clone(),
                Launcher::new(config.launcher_config()),
                PipelineOptions {
                    deadline: config.deadline(),
                    cancel: cancel_on_interrupt(),
                    logger,
                },
            )?;

            let outcome = run_with_status(pipeline.run(task), &tracker, true).await;
            finish(outcome)
        }
    }
}

/// Token cancelled on the first interrupt, so an in-flight dispatch
/// resolves with a cancelled result instead of leaving its child orphaned.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling dispatch");
            token.cancel();
        }
    });
    cancel
}

/// Session logging is best-effort; failures only cost the replay log.
fn session_logger() -> Option<SessionLogger> {
    match SessionLogger::create(Path::new(".")) {
        Ok(logger) => Some(logger),
        Err(e) => {
            tracing::warn!("Session log unavailable: {e}");
            None
        }
    }
}

/// Drive a dispatch future while repainting projector rows on a periodic
/// tick. Status goes to stderr so stdout stays clean for the result text.
async fn run_with_status<F>(dispatch: F, tracker: &WorkTracker, pipeline_mode: bool) -> DispatchOutcome
where
    F: Future<Output = DispatchOutcome>,
{
    let mut dispatch = pin!(dispatch);
    let mut ticks = tokio::time::interval(Duration::from_millis(500));
    let mut last_painted = String::new();

    loop {
        tokio::select! {
            outcome = &mut dispatch => {
                paint_status(tracker, pipeline_mode, &mut last_painted);
                return outcome;
            }
            _ = ticks.tick() => {
                paint_status(tracker, pipeline_mode, &mut last_painted);
            }
        }
    }
}

fn paint_status(tracker: &WorkTracker, pipeline_mode: bool, last_painted: &mut String) {
    let units = tracker.snapshot();
    let rows = if pipeline_mode {
        project::project_pipeline(&units)
    } else {
        project::project(&units)
    };

    let line = rows
        .iter()
        .map(|row| {
            if row.preview.is_empty() {
                format!("{} {} {}s", row.glyph, row.label, row.elapsed_secs)
            } else {
                format!("{} {} {}s  {}", row.glyph, row.label, row.elapsed_secs, row.preview)
            }
        })
        .collect::<Vec<_>>()
        .join("   ");

    if line != *last_painted {
        eprintln!("{line}");
        *last_painted = line;
    }
}

/// Print the capability result and exit non-zero on anything but success.
fn finish(outcome: DispatchOutcome) -> anyhow::Result<()> {
    println!("{outcome}");
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{generate, handle, release_name};
use helm_rollout::config::RolloutConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    // Logs go to stderr; stdout carries events and command output
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    let config = RolloutConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Handle { file } => {
            handle::execute(&config, file.as_deref()).await?;
        }
        Commands::Generate {
            manifest,
            project,
            stage,
            service,
            strategy,
            output,
        } => {
            generate::execute(
                &config, &manifest, &project, &stage, &service, strategy, &output,
            )
            .await?;
        }
        Commands::ReleaseName {
            project,
            stage,
            service,
            generated,
        } => {
            release_name::execute(&project, &stage, &service, generated)?;
        }
    }

    Ok(())
}

//! CLI definitions for helm-rollout
//!
//! This module contains all CLI argument parsing structures using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use helm_rollout::domain::DeploymentStrategy;

#[derive(Parser)]
#[command(
    name = "helm-rollout",
    version,
    about = "Progressive delivery controller for Helm charts behind an Istio mesh",
    long_about = "Drives blue/green and canary rollouts of Helm charts.\nReads lifecycle events, generates mesh charts, and installs releases."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML)
    #[arg(short, long, global = true, env = "HELM_ROLLOUT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle lifecycle events, one JSON event per line
    Handle {
        /// Events file (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Generate the companion chart for a rendered manifest
    Generate {
        /// Rendered manifest of the user chart
        #[arg(long)]
        manifest: PathBuf,

        /// Project name
        #[arg(long)]
        project: String,

        /// Stage name
        #[arg(long)]
        stage: String,

        /// Service name
        #[arg(long)]
        service: String,

        /// Deployment strategy (direct or duplicate)
        #[arg(long, default_value = "duplicate")]
        strategy: DeploymentStrategy,

        /// Output directory for the packaged chart
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Print the Helm release name of a service
    ReleaseName {
        /// Project name
        #[arg(long)]
        project: String,

        /// Stage name
        #[arg(long)]
        stage: String,

        /// Service name
        #[arg(long)]
        service: String,

        /// Name of the generated chart's release
        #[arg(long)]
        generated: bool,
    },
}

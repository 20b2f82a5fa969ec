//! Chart executor backed by the `helm` CLI
//!
//! Charts are packaged into a scratch directory and installed with
//! `helm upgrade --install --wait`, so a call only returns once the release
//! is ready or the timeout expires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::chart::{self, Chart};
use crate::config::HelmConfig;

/// Installs, inspects, and removes chart releases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartExecutor: Send + Sync {
    /// Rendered manifest of an installed release
    async fn get_manifest(&self, release: &str, namespace: &str) -> Result<String>;

    /// Install or upgrade a release and wait for it to become ready.
    ///
    /// `values_override` is layered on top of the chart's own values for this
    /// install only.
    async fn upgrade_chart(
        &self,
        chart: &Chart,
        release: &str,
        namespace: &str,
        values_override: Option<serde_yaml::Value>,
    ) -> Result<()>;

    /// Remove a release; removing a missing release succeeds
    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()>;
}

/// `helm upgrade --install` arguments
pub fn upgrade_args(
    release: &str,
    chart_path: &Path,
    namespace: &str,
    timeout: Duration,
    values_path: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.to_string(),
        chart_path.display().to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--create-namespace".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        format!("{}s", timeout.as_secs()),
    ];
    if let Some(values) = values_path {
        args.push("--values".to_string());
        args.push(values.display().to_string());
    }
    args
}

/// `helm get manifest` arguments
pub fn manifest_args(release: &str, namespace: &str) -> Vec<String> {
    vec![
        "get".to_string(),
        "manifest".to_string(),
        release.to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
    ]
}

/// `helm uninstall` arguments
pub fn uninstall_args(release: &str, namespace: &str) -> Vec<String> {
    vec![
        "uninstall".to_string(),
        release.to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
    ]
}

fn is_release_not_found(stderr: &str) -> bool {
    stderr.to_lowercase().contains("not found")
}

/// Chart executor shelling out to helm
#[derive(Debug, Clone)]
pub struct HelmExecutor {
    binary: PathBuf,
    timeout: Duration,
}

impl HelmExecutor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Configured binary, or `helm` from PATH
    pub fn from_config(config: &HelmConfig) -> Result<Self> {
        let binary = match &config.binary {
            Some(binary) => PathBuf::from(binary),
            None => which::which("helm").context("helm not found on PATH (set HELM_BIN)")?,
        };
        Ok(Self::new(binary, config.timeout()?))
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(binary = %self.binary.display(), args = ?args, "Running helm");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))
    }
}

#[async_trait]
impl ChartExecutor for HelmExecutor {
    async fn get_manifest(&self, release: &str, namespace: &str) -> Result<String> {
        let output = self.run(&manifest_args(release, namespace)).await?;
        if !output.status.success() {
            bail!(
                "helm get manifest {} failed: {}",
                release,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("helm returned a non-UTF-8 manifest")
    }

    async fn upgrade_chart(
        &self,
        chart: &Chart,
        release: &str,
        namespace: &str,
        values_override: Option<serde_yaml::Value>,
    ) -> Result<()> {
        let workspace = tempfile::tempdir().context("Failed to create chart workspace")?;

        let chart_path = workspace.path().join(format!("{}.tgz", chart.name()));
        let bytes = chart::package(chart)?;
        tokio::fs::write(&chart_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", chart_path.display()))?;

        let values_path = match values_override {
            Some(values) => {
                let path = workspace.path().join("override-values.yaml");
                let content = serde_yaml::to_string(&values).context("Failed to encode values override")?;
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                Some(path)
            }
            None => None,
        };

        info!(release = %release, namespace = %namespace, chart = %chart.name(), "Installing chart");
        let args = upgrade_args(
            release,
            &chart_path,
            namespace,
            self.timeout,
            values_path.as_deref(),
        );
        let output = self.run(&args).await?;
        if !output.status.success() {
            bail!(
                "helm upgrade {} failed: {}",
                release,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!(release = %release, "Release is ready");
        Ok(())
    }

    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()> {
        let output = self.run(&uninstall_args(release, namespace)).await?;
        if output.status.success() {
            info!(release = %release, namespace = %namespace, "Uninstalled release");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_release_not_found(&stderr) {
            debug!(release = %release, "Release already absent");
            return Ok(());
        }
        bail!("helm uninstall {} failed: {}", release, stderr.trim())
    }
}

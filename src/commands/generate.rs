//! Generate and package the companion chart of a rendered manifest

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use helm_rollout::chart;
use helm_rollout::config::RolloutConfig;
use helm_rollout::domain::DeploymentStrategy;
use helm_rollout::mesh::IstioMesh;
use helm_rollout::services::ChartSynthesizer;

pub async fn execute(
    config: &RolloutConfig,
    manifest: &Path,
    project: &str,
    stage: &str,
    service: &str,
    strategy: DeploymentStrategy,
    output: &Path,
) -> Result<()> {
    if !strategy.uses_generated_chart() {
        bail!("Strategy {} does not use a generated chart", strategy);
    }

    let manifest = tokio::fs::read_to_string(manifest)
        .await
        .with_context(|| format!("Failed to read manifest {}", manifest.display()))?;

    let synthesizer = ChartSynthesizer::new(config.ingress.clone(), Arc::new(IstioMesh::new()));
    let chart = synthesizer.generate(strategy, &manifest, project, stage, service)?;
    let bytes = chart::package(&chart)?;

    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let path = output.join(format!("{}-{}.tgz", chart.name(), chart.metadata.version));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        chart = %chart.name(),
        templates = chart.templates.len(),
        path = %path.display(),
        "Generated chart"
    );
    println!("{}", path.display());
    Ok(())
}

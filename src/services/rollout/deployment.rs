//! `deployment.triggered`

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{RolloutContext, TaskHandler, TaskOutcome};
use crate::domain::events::{DeploymentFinishedInfo, DeploymentTriggeredData};
use crate::domain::{chart_name, namespace, DeploymentStrategy, Event, Slot, Task};
use crate::error::RolloutError;
use crate::manipulators::{CanaryWeightManipulator, ValuesManipulator};

/// Installs the user chart and, for mesh strategies, the generated chart
pub struct DeploymentHandler;

#[async_trait]
impl TaskHandler for DeploymentHandler {
    fn task(&self) -> Task {
        Task::Deployment
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError> {
        let data: DeploymentTriggeredData = event.decode_data()?;
        data.base.validate()?;
        let strategy: DeploymentStrategy = data
            .deployment
            .deployment_strategy
            .as_deref()
            .ok_or_else(|| RolloutError::Payload("deployment strategy is missing".to_string()))?
            .parse()
            .map_err(RolloutError::Payload)?;

        let base = &data.base;
        let changer = ctx.changer();
        let namespace = namespace(&base.project, &base.stage);

        let (user_chart, mut version) = match &data.configuration_change.values {
            Some(values) => {
                let values = serde_yaml::to_value(values)
                    .map_err(|e| RolloutError::Payload(format!("configurationChange.values: {}", e)))?;
                let (chart, version) = changer
                    .update_chart(base, false, &ValuesManipulator::new(values))
                    .await?;
                (chart, Some(version))
            }
            None => {
                let chart = changer
                    .load_chart(base, false)
                    .await?
                    .ok_or_else(|| RolloutError::chart_not_found(chart_name(&base.service, false)))?;
                (chart, None)
            }
        };

        if strategy == DeploymentStrategy::Duplicate {
            ctx.namespaces
                .enable_mesh_injection(&namespace)
                .await
                .map_err(RolloutError::executor)?;
        }

        let user_release = ctx.release(base, false);
        info!(release = %user_release, strategy = %strategy, "Deploying user chart");
        ctx.executor
            .upgrade_chart(&user_chart, &user_release, &namespace, None)
            .await
            .map_err(RolloutError::executor)?;

        if !strategy.uses_generated_chart() {
            return Ok(TaskOutcome {
                deployment: Some(DeploymentFinishedInfo {
                    deployment_strategy: strategy.to_string(),
                    deployment_names: vec![strategy.to_string()],
                    ..Default::default()
                }),
                ..TaskOutcome::pass()
            }
            .with_version(version));
        }

        let first_deployment = !changer.exists(base, true).await?;
        if first_deployment {
            let manifest = ctx
                .executor
                .get_manifest(&user_release, &namespace)
                .await
                .map_err(RolloutError::executor)?;
            let generated = ctx.synthesizer().generate(
                strategy,
                &manifest,
                &base.project,
                &base.stage,
                &base.service,
            )?;
            version = Some(changer.store_chart(base, &generated, true).await?);
        }

        let generated = if strategy == DeploymentStrategy::Duplicate {
            let manipulator = CanaryWeightManipulator::new(Arc::clone(&ctx.mesh), 100);
            let (chart, token) = changer.update_chart(base, true, &manipulator).await?;
            version = Some(token);
            chart
        } else {
            changer
                .load_chart(base, true)
                .await?
                .ok_or_else(|| RolloutError::chart_not_found(chart_name(&base.service, true)))?
        };

        let generated_release = ctx.release(base, true);
        info!(release = %generated_release, "Deploying generated chart");
        ctx.executor
            .upgrade_chart(&generated, &generated_release, &namespace, None)
            .await
            .map_err(RolloutError::executor)?;

        let deployment_name = match strategy {
            DeploymentStrategy::Duplicate if first_deployment => Slot::Primary.name().to_string(),
            DeploymentStrategy::Duplicate => Slot::Canary.name().to_string(),
            other => other.to_string(),
        };

        Ok(TaskOutcome {
            deployment: Some(DeploymentFinishedInfo {
                deployment_strategy: strategy.to_string(),
                deployment_names: vec![deployment_name],
                deployment_uris_public: vec![ctx
                    .ingress
                    .public_url(&base.project, &base.stage, &base.service)?],
                deployment_uris_local: vec![format!("http://{}.{}", base.service, namespace)],
            }),
            ..TaskOutcome::pass()
        }
        .with_version(version))
    }
}

//! `release.triggered`

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{RolloutContext, TaskHandler, TaskOutcome};
use crate::domain::events::ReleaseTriggeredData;
use crate::domain::{chart_name, namespace, DeploymentStrategy, Event, EventData, Task, TaskResult};
use crate::error::RolloutError;
use crate::manipulators::CanaryWeightManipulator;

/// Promotes a passing canary to primary, or falls back to primary on failure
pub struct ReleaseHandler;

#[async_trait]
impl TaskHandler for ReleaseHandler {
    fn task(&self) -> Task {
        Task::Release
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError> {
        let data: ReleaseTriggeredData = event.decode_data()?;
        data.base.validate()?;

        let strategy = ctx
            .resolve_strategy(&data.base, data.deployment.deployment_strategy.as_deref())
            .await?;
        if strategy != DeploymentStrategy::Duplicate {
            return Ok(TaskOutcome::pass()
                .with_message(format!("Nothing to release for strategy {}", strategy)));
        }

        let version = match data.base.result {
            Some(TaskResult::Fail) => {
                info!(service = %data.base.service, "Evaluation failed, keeping primary");
                restore_primary(ctx, &data.base).await?
            }
            _ => promote_canary(ctx, &data.base).await?,
        };

        Ok(TaskOutcome::pass().with_version(Some(version)))
    }
}

/// Copy the canary's live manifest into the primary slot, then shift all
/// traffic back to primary
async fn promote_canary(ctx: &RolloutContext, base: &EventData) -> Result<String, RolloutError> {
    let namespace = namespace(&base.project, &base.stage);
    let changer = ctx.changer();
    let generated_release = ctx.release(base, true);

    let manifest = ctx
        .executor
        .get_manifest(&ctx.release(base, false), &namespace)
        .await
        .map_err(RolloutError::executor)?;
    let fresh = ctx
        .synthesizer()
        .generate_duplicate_chart(&manifest, &base.project, &base.stage, &base.service)?;

    // Primary is replaced while canary still takes all traffic
    let (chart, _) = changer
        .update_loaded_chart(
            base,
            fresh,
            true,
            &CanaryWeightManipulator::new(Arc::clone(&ctx.mesh), 100),
        )
        .await?;
    ctx.executor
        .upgrade_chart(&chart, &generated_release, &namespace, None)
        .await
        .map_err(RolloutError::executor)?;
    info!(release = %generated_release, "Primary updated from canary");

    restore_primary(ctx, base).await
}

/// Route all traffic to primary and scale the canary down
pub(super) async fn restore_primary(
    ctx: &RolloutContext,
    base: &EventData,
) -> Result<String, RolloutError> {
    let namespace = namespace(&base.project, &base.stage);
    let generated_release = ctx.release(base, true);

    let (chart, version) = ctx
        .changer()
        .update_chart(
            base,
            true,
            &CanaryWeightManipulator::new(Arc::clone(&ctx.mesh), 0),
        )
        .await?;
    ctx.executor
        .upgrade_chart(&chart, &generated_release, &namespace, None)
        .await
        .map_err(RolloutError::executor)?;
    info!(release = %generated_release, "All traffic routed to primary");

    scale_down_canary(ctx, base, &namespace).await?;
    Ok(version)
}

/// Reinstall the user release with zero replicas; the stored chart keeps
/// its replica count for the next deployment
async fn scale_down_canary(
    ctx: &RolloutContext,
    base: &EventData,
    namespace: &str,
) -> Result<(), RolloutError> {
    let user_chart = ctx
        .changer()
        .load_chart(base, false)
        .await?
        .ok_or_else(|| RolloutError::chart_not_found(chart_name(&base.service, false)))?;

    let user_release = ctx.release(base, false);
    let mut values = serde_yaml::Mapping::new();
    values.insert("replicaCount".into(), 0.into());

    ctx.executor
        .upgrade_chart(
            &user_chart,
            &user_release,
            namespace,
            Some(serde_yaml::Value::Mapping(values)),
        )
        .await
        .map_err(RolloutError::executor)?;

    info!(release = %user_release, "Canary scaled down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{self, Chart};
    use crate::infrastructure::helm::MockChartExecutor;
    use crate::infrastructure::namespace::MockNamespaceManager;
    use crate::infrastructure::ChartStore;
    use crate::services::rollout::run_task;
    use crate::services::rollout::test_support::*;
    use crate::services::ConfigurationChanger;
    use mockall::Sequence;
    use serde_json::json;

    const MANIFEST: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: carts\nspec:\n  selector:\n    app: carts\n";

    async fn seed(h: &Harness) {
        let data = EventData::lenient(&address());
        let changer = h.ctx.changer();
        changer
            .store_chart(&data, &Chart::new("carts", "0.1.0"), false)
            .await
            .unwrap();
        let generated = h
            .ctx
            .synthesizer()
            .generate_duplicate_chart(MANIFEST, "sockshop", "dev", "carts")
            .unwrap();
        changer.store_chart(&data, &generated, true).await.unwrap();
    }

    fn is_scale_down(values: &Option<serde_yaml::Value>) -> bool {
        values
            .as_ref()
            .and_then(|v| v.get("replicaCount"))
            .and_then(|v| v.as_i64())
            == Some(0)
    }

    fn canary_weight(chart: &Chart) -> Option<String> {
        chart
            .template("templates/carts-istio-virtualservice.yaml")
            .map(|t| String::from_utf8_lossy(&t.data).into_owned())
    }

    #[tokio::test]
    async fn test_release_pass_promotes_then_restores_primary() {
        let mut seq = Sequence::new();
        let mut executor = MockChartExecutor::new();
        executor
            .expect_get_manifest()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(MANIFEST.to_string()));
        executor
            .expect_upgrade_chart()
            .withf(|chart, release, _, values| {
                release == "sockshop-dev-carts-generated"
                    && values.is_none()
                    && canary_weight(chart).is_some_and(|rule| rule.contains("weight: 100"))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        executor
            .expect_upgrade_chart()
            .withf(|_, release, _, values| release == "sockshop-dev-carts-generated" && values.is_none())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        executor
            .expect_upgrade_chart()
            .withf(|chart, release, _, values| {
                chart.name() == "carts" && release == "sockshop-dev-carts" && is_scale_down(values)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));

        let h = harness(executor, MockNamespaceManager::new());
        seed(&h).await;

        let mut data = address();
        data["result"] = json!("pass");
        run_task(&h.ctx, &ReleaseHandler, &triggered(Task::Release, data)).await;

        let finished = finished_data(&h.sink);
        assert_eq!(finished["status"], "succeeded", "{}", finished);
        assert_eq!(finished["result"], "pass");

        let stored = h
            .store
            .get(&ConfigurationChanger::key(&EventData::lenient(&address()), true))
            .await
            .unwrap()
            .unwrap();
        let rule = canary_weight(&chart::load(&stored).unwrap()).unwrap();
        let rule: crate::mesh::istio::VirtualService = serde_yaml::from_str(&rule).unwrap();
        let weights: Vec<Option<u32>> = rule.spec.http[0].route.iter().map(|d| d.weight).collect();
        assert_eq!(weights, vec![Some(0), Some(100)]);
    }

    #[tokio::test]
    async fn test_release_fail_restores_primary_without_promotion() {
        let mut executor = MockChartExecutor::new();
        executor.expect_get_manifest().never();
        executor
            .expect_upgrade_chart()
            .times(2)
            .returning(|_, _, _, _| Ok(()));

        let h = harness(executor, MockNamespaceManager::new());
        seed(&h).await;

        let mut data = address();
        data["result"] = json!("fail");
        run_task(&h.ctx, &ReleaseHandler, &triggered(Task::Release, data)).await;

        assert_eq!(finished_data(&h.sink)["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_release_direct_passes_immediately() {
        let mut executor = MockChartExecutor::new();
        executor.expect_upgrade_chart().never();
        executor.expect_get_manifest().never();
        let h = harness(executor, MockNamespaceManager::new());

        let mut data = address();
        data["deployment"] = json!({"deploymentstrategy": "direct"});
        run_task(&h.ctx, &ReleaseHandler, &triggered(Task::Release, data)).await;

        let finished = finished_data(&h.sink);
        assert_eq!(finished["status"], "succeeded");
        assert_eq!(finished["result"], "pass");
    }

    #[tokio::test]
    async fn test_scale_down_failure_is_reported() {
        let mut executor = MockChartExecutor::new();
        executor
            .expect_upgrade_chart()
            .withf(|_, release, _, _| release == "sockshop-dev-carts")
            .returning(|_, _, _, _| Err(anyhow::anyhow!("cluster unreachable")));
        executor
            .expect_upgrade_chart()
            .returning(|_, _, _, _| Ok(()));

        let h = harness(executor, MockNamespaceManager::new());
        seed(&h).await;

        let mut data = address();
        data["result"] = json!("fail");
        run_task(&h.ctx, &ReleaseHandler, &triggered(Task::Release, data)).await;

        let finished = finished_data(&h.sink);
        assert_eq!(finished["status"], "errored");
        assert!(finished["message"].as_str().unwrap().contains("cluster unreachable"));
    }
}

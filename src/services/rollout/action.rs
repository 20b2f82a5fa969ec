//! `action.triggered`
//!
//! Only the `scaling` action belongs to this service; other actions are left
//! to whoever else listens for them.

use async_trait::async_trait;
use tracing::info;

use super::{RolloutContext, TaskHandler, TaskOutcome};
use crate::domain::events::ActionTriggeredData;
use crate::domain::{namespace, Event, Task};
use crate::error::RolloutError;
use crate::manipulators::{parse_scaling_value, ReplicaCountManipulator};

pub const SCALING_ACTION: &str = "scaling";

/// Changes the replica count of the generated chart's Deployments
pub struct ActionHandler;

#[async_trait]
impl TaskHandler for ActionHandler {
    fn task(&self) -> Task {
        Task::Action
    }

    fn accepts(&self, event: &Event) -> bool {
        event
            .data
            .get("action")
            .and_then(|a| a.get("action"))
            .and_then(|a| a.as_str())
            == Some(SCALING_ACTION)
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError> {
        let data: ActionTriggeredData = event.decode_data()?;
        data.base.validate()?;
        let delta = parse_scaling_value(&data.action.value)?;

        let base = &data.base;
        let (chart, version) = ctx
            .changer()
            .update_chart(base, true, &ReplicaCountManipulator::new(delta))
            .await?;

        let release = ctx.release(base, true);
        ctx.executor
            .upgrade_chart(&chart, &release, &namespace(&base.project, &base.stage), None)
            .await
            .map_err(RolloutError::executor)?;

        info!(release = %release, delta = delta, "Scaled generated chart");
        Ok(TaskOutcome::pass().with_version(Some(version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{self, Chart};
    use crate::domain::EventData;
    use crate::infrastructure::helm::MockChartExecutor;
    use crate::infrastructure::namespace::MockNamespaceManager;
    use crate::infrastructure::ChartStore;
    use crate::services::rollout::run_task;
    use crate::services::rollout::test_support::*;
    use crate::services::ConfigurationChanger;
    use serde_json::json;

    fn scaling(value: serde_json::Value) -> Event {
        let mut data = address();
        data["action"] = json!({"action": "scaling", "value": value});
        triggered(Task::Action, data)
    }

    async fn seed(h: &Harness) {
        let mut chart = Chart::new("carts-generated", "0.1.0");
        chart.add_template(
            "carts-primary-deployment.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: carts-primary\nspec:\n  replicas: 1\n",
        );
        h.ctx
            .changer()
            .store_chart(&EventData::lenient(&address()), &chart, true)
            .await
            .unwrap();
    }

    #[test]
    fn test_accepts_only_scaling() {
        assert!(ActionHandler.accepts(&scaling(json!(1))));

        let mut data = address();
        data["action"] = json!({"action": "toggle-feature", "value": {"flag": "on"}});
        assert!(!ActionHandler.accepts(&triggered(Task::Action, data)));
        assert!(!ActionHandler.accepts(&triggered(Task::Action, address())));
    }

    #[tokio::test]
    async fn test_scaling_updates_and_reinstalls_generated_chart() {
        let mut executor = MockChartExecutor::new();
        executor
            .expect_upgrade_chart()
            .withf(|chart, release, _, _| {
                chart.name() == "carts-generated" && release == "sockshop-dev-carts-generated"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let h = harness(executor, MockNamespaceManager::new());
        seed(&h).await;

        run_task(&h.ctx, &ActionHandler, &scaling(json!("2"))).await;

        assert_eq!(finished_data(&h.sink)["result"], "pass");
        let stored = h
            .store
            .get(&ConfigurationChanger::key(&EventData::lenient(&address()), true))
            .await
            .unwrap()
            .unwrap();
        let chart = chart::load(&stored).unwrap();
        let text = String::from_utf8(chart.templates[0].data.clone()).unwrap();
        assert!(text.contains("replicas: 3"));
    }

    #[tokio::test]
    async fn test_non_numeric_value_errors_without_write() {
        let mut executor = MockChartExecutor::new();
        executor.expect_upgrade_chart().never();
        let h = harness(executor, MockNamespaceManager::new());
        seed(&h).await;
        let before = h
            .store
            .get(&ConfigurationChanger::key(&EventData::lenient(&address()), true))
            .await
            .unwrap();

        run_task(&h.ctx, &ActionHandler, &scaling(json!("lots"))).await;

        let finished = finished_data(&h.sink);
        assert_eq!(finished["status"], "errored");
        assert!(finished["message"].as_str().unwrap().contains("lots"));
        let after = h
            .store
            .get(&ConfigurationChanger::key(&EventData::lenient(&address()), true))
            .await
            .unwrap();
        assert_eq!(before, after);
    }
}

//! `rollback.triggered`

use async_trait::async_trait;
use tracing::info;

use super::release::restore_primary;
use super::{RolloutContext, TaskHandler, TaskOutcome};
use crate::domain::events::ReleaseTriggeredData;
use crate::domain::{DeploymentStrategy, Event, Task};
use crate::error::RolloutError;

/// Sends all traffic back to primary and scales the canary down
pub struct RollbackHandler;

#[async_trait]
impl TaskHandler for RollbackHandler {
    fn task(&self) -> Task {
        Task::Rollback
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError> {
        let data: ReleaseTriggeredData = event.decode_data()?;
        data.base.validate()?;

        let strategy = ctx
            .resolve_strategy(&data.base, data.deployment.deployment_strategy.as_deref())
            .await?;
        if strategy != DeploymentStrategy::Duplicate {
            return Ok(TaskOutcome::pass().with_message(format!(
                "Strategy {} keeps no previous version to roll back to",
                strategy
            )));
        }

        info!(service = %data.base.service, "Rolling back to primary");
        let version = restore_primary(ctx, &data.base).await?;
        Ok(TaskOutcome::pass().with_version(Some(version)))
    }
}

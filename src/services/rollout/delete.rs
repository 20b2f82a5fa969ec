//! `service.delete.triggered`
//!
//! Teardown is best effort: every stage is visited even when an earlier
//! uninstall or delete failed, and failures only downgrade the result to
//! `warning`.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{RolloutContext, TaskHandler, TaskOutcome};
use crate::domain::{namespace, Event, EventData, Task};
use crate::error::RolloutError;
use crate::services::ConfigurationChanger;

/// Removes a service's releases and generated charts from every stage
pub struct ServiceDeleteHandler;

#[async_trait]
impl TaskHandler for ServiceDeleteHandler {
    fn task(&self) -> Task {
        Task::ServiceDelete
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError> {
        let data: EventData = event.decode_data()?;
        data.validate_service()?;

        let stages = ctx
            .stages
            .stages(&data.project)
            .await
            .map_err(RolloutError::persistence)?;

        let mut failures = Vec::new();
        for stage in &stages {
            let target = EventData {
                stage: stage.clone(),
                ..data.address()
            };
            let namespace = namespace(&target.project, stage);

            for generated in [false, true] {
                let release = ctx.release(&target, generated);
                if let Err(e) = ctx.executor.uninstall_release(&release, &namespace).await {
                    warn!(release = %release, namespace = %namespace, error = %e, "Uninstall failed");
                    failures.push(format!("uninstall {} in {}: {:#}", release, namespace, e));
                }
            }

            let key = ConfigurationChanger::key(&target, true);
            if let Err(e) = ctx.store.delete(&key).await {
                warn!(chart = %key, error = %e, "Chart delete failed");
                failures.push(format!("delete chart {}: {:#}", key, e));
            }
        }

        info!(
            service = %data.service,
            stages = stages.len(),
            failures = failures.len(),
            "Service teardown complete"
        );

        if failures.is_empty() {
            Ok(TaskOutcome::pass())
        } else {
            Ok(TaskOutcome::warning(format!(
                "Some resources could not be removed: {}",
                failures.join("; ")
            )))
        }
    }
}

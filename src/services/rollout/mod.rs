//! Rollout controller
//!
//! Every `<task>.triggered` event runs on its own tokio task. The runner
//! announces the task with `<task>.started`, runs the handler, and always
//! ends with exactly one `<task>.finished`, even when the handler fails or
//! panics.

mod action;
mod delete;
mod deployment;
mod release;
mod rollback;

pub use action::{ActionHandler, SCALING_ACTION};
pub use delete::ServiceDeleteHandler;
pub use deployment::DeploymentHandler;
pub use release::ReleaseHandler;
pub use rollback::RollbackHandler;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{IngressConfig, RolloutConfig};
use crate::domain::events::{DeploymentFinishedInfo, FinishedData};
use crate::domain::{
    release_name, DeploymentStrategy, Event, EventData, EventType, Phase, Status, Task, TaskResult,
};
use crate::error::RolloutError;
use crate::infrastructure::{ChartExecutor, ChartStore, EventSink, NamespaceManager, StageCatalog};
use crate::mesh::{IstioMesh, Mesh};
use crate::services::{ChartSynthesizer, ConfigurationChanger};

/// Collaborators shared by every handler
pub struct RolloutContext {
    pub ingress: IngressConfig,
    /// `source` of emitted events
    pub source: String,
    pub mesh: Arc<dyn Mesh>,
    pub store: Arc<dyn ChartStore>,
    pub stages: Arc<dyn StageCatalog>,
    pub executor: Arc<dyn ChartExecutor>,
    pub namespaces: Arc<dyn NamespaceManager>,
    pub events: Arc<dyn EventSink>,
}

impl RolloutContext {
    /// Context using the Istio mesh adapter
    pub fn new(
        config: &RolloutConfig,
        store: Arc<dyn ChartStore>,
        stages: Arc<dyn StageCatalog>,
        executor: Arc<dyn ChartExecutor>,
        namespaces: Arc<dyn NamespaceManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ingress: config.ingress.clone(),
            source: config.events.source.clone(),
            mesh: Arc::new(IstioMesh::new()),
            store,
            stages,
            executor,
            namespaces,
            events,
        }
    }

    pub fn synthesizer(&self) -> ChartSynthesizer {
        ChartSynthesizer::new(self.ingress.clone(), self.mesh.clone())
    }

    pub fn changer(&self) -> ConfigurationChanger {
        ConfigurationChanger::new(self.store.clone())
    }

    /// Strategy for release and rollback: the event's, else the one recorded
    /// in the generated chart, else user-managed
    pub async fn resolve_strategy(
        &self,
        data: &EventData,
        requested: Option<&str>,
    ) -> Result<DeploymentStrategy, RolloutError> {
        if let Some(requested) = requested.filter(|s| !s.trim().is_empty()) {
            return requested.parse().map_err(RolloutError::Payload);
        }

        let recorded = self
            .changer()
            .load_chart(data, true)
            .await?
            .and_then(|chart| chart.deployment_strategy());

        Ok(recorded.unwrap_or(DeploymentStrategy::UserManaged))
    }

    pub fn release(&self, data: &EventData, generated: bool) -> String {
        release_name(&data.project, &data.stage, &data.service, generated)
    }
}

/// What a successful handler reports in its `.finished` event
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub result: TaskResult,
    pub message: Option<String>,
    pub deployment: Option<DeploymentFinishedInfo>,
    pub version_token: Option<String>,
}

impl TaskOutcome {
    pub fn pass() -> Self {
        Self {
            result: TaskResult::Pass,
            message: None,
            deployment: None,
            version_token: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            result: TaskResult::Warning,
            message: Some(message.into()),
            ..Self::pass()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version_token = version;
        self
    }
}

/// Handles one task's `.triggered` events
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task(&self) -> Task;

    /// Whether this service takes part in the event at all; declined events
    /// get no `.started` or `.finished`
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    async fn handle(&self, ctx: &RolloutContext, event: &Event) -> Result<TaskOutcome, RolloutError>;
}

/// Routes triggered events to their handlers
pub struct RolloutController {
    ctx: Arc<RolloutContext>,
    handlers: Vec<Arc<dyn TaskHandler>>,
}

impl RolloutController {
    /// Controller with the deployment, release, rollback, action, and
    /// service delete handlers
    pub fn new(ctx: Arc<RolloutContext>) -> Self {
        Self {
            ctx,
            handlers: vec![
                Arc::new(DeploymentHandler),
                Arc::new(ReleaseHandler),
                Arc::new(RollbackHandler),
                Arc::new(ActionHandler),
                Arc::new(ServiceDeleteHandler),
            ],
        }
    }

    pub fn context(&self) -> &Arc<RolloutContext> {
        &self.ctx
    }

    /// Handler responsible for an event, if any
    pub fn handler_for(&self, event: &Event) -> Option<Arc<dyn TaskHandler>> {
        let Some(event_type) = event.parsed_type() else {
            debug!(event_type = %event.event_type, "Ignoring unknown event type");
            return None;
        };
        if event_type.phase != Phase::Triggered {
            debug!(event_type = %event.event_type, "Ignoring non-triggered event");
            return None;
        }

        self.handlers
            .iter()
            .find(|h| h.task() == event_type.task)
            .filter(|h| h.accepts(event))
            .cloned()
    }

    /// Run the event's task on its own tokio task
    pub fn dispatch(&self, event: Event) -> Option<JoinHandle<()>> {
        let handler = self.handler_for(&event)?;
        let ctx = self.ctx.clone();
        Some(tokio::spawn(async move {
            run_task(&ctx, handler.as_ref(), &event).await;
        }))
    }

    /// Run the event's task to completion on the current task.
    ///
    /// Returns `false` when no handler took the event.
    pub async fn handle(&self, event: &Event) -> bool {
        match self.handler_for(event) {
            Some(handler) => {
                run_task(&self.ctx, handler.as_ref(), event).await;
                true
            }
            None => false,
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

async fn emit(ctx: &RolloutContext, triggered: &Event, event_type: EventType, data: impl serde::Serialize) {
    let event = match Event::new(event_type, ctx.source.clone(), data) {
        Ok(event) => event.answering(triggered),
        Err(e) => {
            error!(event_type = %event_type, error = %e, "Failed to build event");
            return;
        }
    };

    if let Err(e) = ctx.events.send(&event).await {
        let message = format!("{:#}", e);
        error!(event_type = %event_type, error = %message, "Failed to send event");
    }
}

/// `.started`, handler, `.finished`
pub async fn run_task(ctx: &RolloutContext, handler: &dyn TaskHandler, event: &Event) {
    let task = handler.task();
    let address = EventData::lenient(&event.data);

    info!(
        task = %task,
        project = %address.project,
        stage = %address.stage,
        service = %address.service,
        "Task started"
    );
    emit(
        ctx,
        event,
        EventType::new(task, Phase::Started),
        EventData {
            status: Some(Status::Succeeded),
            ..address.clone()
        },
    )
    .await;

    let outcome = AssertUnwindSafe(handler.handle(ctx, event))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(RolloutError::Internal(panic_message(panic))));

    let finished = match outcome {
        Ok(outcome) => {
            info!(task = %task, service = %address.service, result = ?outcome.result, "Task finished");
            FinishedData {
                base: EventData {
                    status: Some(Status::Succeeded),
                    result: Some(outcome.result),
                    message: outcome.message,
                    ..address.clone()
                },
                deployment: outcome.deployment,
                version_token: outcome.version_token,
            }
        }
        Err(e) => {
            warn!(task = %task, service = %address.service, error = %e, "Task failed");
            FinishedData {
                base: EventData {
                    status: Some(Status::Errored),
                    result: Some(TaskResult::Fail),
                    message: Some(e.to_string()),
                    ..address.clone()
                },
                deployment: None,
                version_token: None,
            }
        }
    };

    emit(ctx, event, EventType::new(task, Phase::Finished), finished).await;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::infrastructure::helm::MockChartExecutor;
    use crate::infrastructure::namespace::MockNamespaceManager;
    use crate::infrastructure::{InMemoryChartStore, MemoryEventSink};
    use serde_json::json;

    pub fn triggered(task: Task, data: serde_json::Value) -> Event {
        let mut event = Event::new(EventType::new(task, Phase::Triggered), "test", data).unwrap();
        event.context = Some("ctx-1".to_string());
        event
    }

    pub fn address() -> serde_json::Value {
        json!({"project": "sockshop", "stage": "dev", "service": "carts"})
    }

    pub struct Harness {
        pub store: Arc<InMemoryChartStore>,
        pub sink: Arc<MemoryEventSink>,
        pub ctx: RolloutContext,
    }

    pub fn harness(executor: MockChartExecutor, namespaces: MockNamespaceManager) -> Harness {
        let store = Arc::new(InMemoryChartStore::new());
        let sink = Arc::new(MemoryEventSink::new());
        let ctx = RolloutContext::new(
            &RolloutConfig::default(),
            store.clone(),
            store.clone(),
            Arc::new(executor),
            Arc::new(namespaces),
            sink.clone(),
        );
        Harness { store, sink, ctx }
    }

    pub fn finished_data(sink: &MemoryEventSink) -> serde_json::Value {
        sink.events()
            .into_iter()
            .find(|e| e.event_type.ends_with(".finished"))
            .map(|e| e.data)
            .expect("finished event")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::infrastructure::helm::MockChartExecutor;
    use crate::infrastructure::namespace::MockNamespaceManager;

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        fn task(&self) -> Task {
            Task::Release
        }

        async fn handle(&self, _ctx: &RolloutContext, _event: &Event) -> Result<TaskOutcome, RolloutError> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_still_finishes() {
        let h = harness(MockChartExecutor::new(), MockNamespaceManager::new());
        let event = triggered(Task::Release, address());

        run_task(&h.ctx, &PanickingHandler, &event).await;

        let events = h.sink.events();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["release.started", "release.finished"]);
        assert_eq!(events[1].data["status"], "errored");
        assert!(events[1].data["message"].as_str().unwrap().contains("boom"));
        assert_eq!(events[1].triggeredid.as_deref(), Some(event.id.as_str()));
        assert_eq!(events[1].context.as_deref(), Some("ctx-1"));
    }

    #[tokio::test]
    async fn test_controller_ignores_non_triggered_and_unknown_events() {
        let h = harness(MockChartExecutor::new(), MockNamespaceManager::new());
        let controller = RolloutController::new(Arc::new(h.ctx));

        let mut started = triggered(Task::Deployment, address());
        started.event_type = "deployment.started".to_string();
        assert!(controller.handler_for(&started).is_none());

        let mut unknown = triggered(Task::Deployment, address());
        unknown.event_type = "evaluation.triggered".to_string();
        assert!(!controller.handle(&unknown).await);

        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_runs_on_own_task() {
        let h = harness(MockChartExecutor::new(), MockNamespaceManager::new());
        let sink = h.sink.clone();
        let controller = RolloutController::new(Arc::new(h.ctx));

        // Missing strategy fails before any side effect
        let handle = controller
            .dispatch(triggered(Task::Deployment, address()))
            .expect("handled");
        handle.await.unwrap();

        let data = finished_data(&sink);
        assert_eq!(data["status"], "errored");
        assert_eq!(data["project"], "sockshop");
    }

    #[tokio::test]
    async fn test_resolve_strategy_defaults_to_user_managed() {
        let h = harness(MockChartExecutor::new(), MockNamespaceManager::new());
        let data = EventData::lenient(&address());

        assert_eq!(
            h.ctx.resolve_strategy(&data, None).await.unwrap(),
            DeploymentStrategy::UserManaged
        );
        assert_eq!(
            h.ctx.resolve_strategy(&data, Some("direct")).await.unwrap(),
            DeploymentStrategy::Direct
        );
        assert!(matches!(
            h.ctx.resolve_strategy(&data, Some("canary")).await,
            Err(RolloutError::Payload(_))
        ));

        let mut chart = crate::chart::Chart::new("carts-generated", "0.1.0");
        chart.set_deployment_strategy(DeploymentStrategy::Duplicate);
        h.ctx.changer().store_chart(&data, &chart, true).await.unwrap();
        assert_eq!(
            h.ctx.resolve_strategy(&data, None).await.unwrap(),
            DeploymentStrategy::Duplicate
        );
    }
}

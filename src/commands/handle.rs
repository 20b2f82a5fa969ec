//! Handle lifecycle events from a JSON-lines stream
//!
//! Each line is one event. Events are dispatched as they are read, each on
//! its own task, and the command returns once all of them have finished.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use helm_rollout::config::RolloutConfig;
use helm_rollout::domain::Event;
use helm_rollout::infrastructure::{
    EventSink, FsChartStore, HelmExecutor, HttpEventSink, KubeNamespaceManager, StdoutEventSink,
};
use helm_rollout::services::{RolloutContext, RolloutController};

pub async fn execute(config: &RolloutConfig, file: Option<&Path>) -> Result<()> {
    let controller = RolloutController::new(Arc::new(build_context(config)?));

    match file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            run(&controller, BufReader::new(file)).await
        }
        None => run(&controller, BufReader::new(tokio::io::stdin())).await,
    }
}

fn build_context(config: &RolloutConfig) -> Result<RolloutContext> {
    let store = Arc::new(FsChartStore::new(&config.store.root));
    let executor = Arc::new(HelmExecutor::from_config(&config.helm)?);

    let events: Arc<dyn EventSink> = match &config.events.endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Sending events over HTTP");
            Arc::new(HttpEventSink::new(endpoint.clone())?)
        }
        None => Arc::new(StdoutEventSink::new()),
    };

    Ok(RolloutContext::new(
        config,
        store.clone(),
        store,
        executor,
        Arc::new(KubeNamespaceManager::new()),
        events,
    ))
}

async fn run<R: AsyncBufRead + Unpin>(controller: &RolloutController, reader: R) -> Result<()> {
    let mut lines = reader.lines();
    let mut tasks = Vec::new();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read events")? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed event");
                continue;
            }
        };

        match controller.dispatch(event) {
            Some(task) => tasks.push(task),
            None => info!(line = line_number, "No handler for event"),
        }
    }

    let dispatched = tasks.len();
    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Event task did not complete");
        }
    }

    info!(events = dispatched, "All events handled");
    Ok(())
}

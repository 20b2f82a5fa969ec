//! Outgoing lifecycle events
//!
//! ## Sinks
//!
//! 1. **Stdout**: one JSON event per line, optionally prefixed for log shippers
//! 2. **HTTP**: POSTed to `EVENT_ENDPOINT`
//! 3. **Memory**: kept in process, for tests and embedding

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::Event;

/// Destination of `.started` and `.finished` events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &Event) -> Result<()>;
}

/// Writes events to stdout as JSON lines
#[derive(Debug, Clone, Default)]
pub struct StdoutEventSink {
    prefix: Option<String>,
}

impl StdoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every line, e.g. `ROLLOUT_EVENT:`, so collectors can pick
    /// events out of mixed output
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn render(&self, event: &Event) -> Result<String> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, json),
            None => json,
        })
    }
}

#[async_trait]
impl EventSink for StdoutEventSink {
    async fn send(&self, event: &Event) -> Result<()> {
        println!("{}", self.render(event)?);
        Ok(())
    }
}

/// POSTs events to an HTTP endpoint
pub struct HttpEventSink {
    client: Client,
    endpoint: String,
}

impl HttpEventSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &Event) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .context("Failed to send event")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Event endpoint returned {}: {}", status, body);
        }

        debug!(event_type = %event.event_type, id = %event.id, "Event delivered");
        Ok(())
    }
}

/// Keeps every sent event in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events sent so far, in send order
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn send(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

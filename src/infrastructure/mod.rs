//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Chart persistence (filesystem, memory)
//! - Helm releases
//! - Kubernetes namespaces
//! - Event delivery

pub mod chart_store;
pub mod event_sink;
pub mod helm;
pub mod namespace;

// Re-export commonly used types
pub use chart_store::{
    ChartKey, ChartStore, FsChartStore, InMemoryChartStore, StageCatalog, StaticStageCatalog,
};
pub use event_sink::{EventSink, HttpEventSink, MemoryEventSink, StdoutEventSink};
pub use helm::{ChartExecutor, HelmExecutor};
pub use namespace::{KubeNamespaceManager, NamespaceManager};

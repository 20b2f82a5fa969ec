//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod events;
pub mod manifest;
pub mod naming;
pub mod strategy;

// Re-export commonly used types
pub use events::{Event, EventData, EventType, Phase, Status, Task, TaskResult};
pub use manifest::{ParsedManifest, Slot};
pub use naming::{chart_name, namespace, release_name};
pub use strategy::DeploymentStrategy;

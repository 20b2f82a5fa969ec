//! Service layer - orchestrates domain logic and infrastructure
//!
//! Services coordinate between the pure domain layer and the
//! infrastructure adapters to implement the rollout workflows.

pub mod configuration_changer;
pub mod generated_chart;
pub mod rollout;

pub use configuration_changer::ConfigurationChanger;
pub use generated_chart::ChartSynthesizer;
pub use rollout::{RolloutContext, RolloutController, TaskHandler, TaskOutcome};

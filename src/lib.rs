//! helm-rollout
//!
//! Progressive delivery for Helm charts behind an Istio mesh. A user chart is
//! paired with a generated chart holding mesh routing (and, for the duplicate
//! strategy, canary/primary workload copies); lifecycle events then move
//! traffic between the two slots.
//!
//! Layers:
//! - [`domain`]: naming, strategies, manifests, events (no I/O)
//! - [`chart`], [`mesh`], [`manipulators`]: chart model and in-memory edits
//! - [`infrastructure`]: chart store, helm, Kubernetes, event sinks
//! - [`services`]: chart synthesis, configuration changes, rollout handlers

pub mod chart;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod manipulators;
pub mod mesh;
pub mod services;

pub use error::{ChartError, ConfigError, ManipulationError, MeshError, RolloutError};

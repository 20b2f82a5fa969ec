//! Centralized error types for helm-rollout
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

/// Top-level error type for a rollout task
///
/// Every variant is recovered at the handler boundary and reported
/// through the task's `.finished` event.
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Invalid event payload: {0}")]
    Payload(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Chart manipulation failed: {0}")]
    Manipulation(#[from] ManipulationError),

    #[error("Chart store error: {message}")]
    Persistence { message: String },

    #[error("Chart executor error: {message}")]
    Executor { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chart error: {0}")]
    Chart(#[from] ChartError),

    #[error("Task aborted: {0}")]
    Internal(String),
}

impl RolloutError {
    pub fn chart_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Chart",
            name: name.into(),
        }
    }

    /// Wrap a chart store failure, keeping the full anyhow context chain
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence {
            message: format!("{:#}", err),
        }
    }

    /// Wrap a chart executor failure, keeping the full anyhow context chain
    pub fn executor(err: anyhow::Error) -> Self {
        Self::Executor {
            message: format!("{:#}", err),
        }
    }
}

/// Errors raised while editing a chart in memory
#[derive(Error, Debug)]
pub enum ManipulationError {
    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("Scaling value '{value}' is not an integer")]
    InvalidScalingValue { value: String },

    #[error("Deployment {name} in {template} would end up with {replicas} replicas")]
    InvalidReplicaCount {
        template: String,
        name: String,
        replicas: i64,
    },

    #[error("Failed to encode template {template}: {message}")]
    TemplateEncoding { template: String, message: String },
}

/// Mesh routing resource errors
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Destination host {host} does not belong to service {service}")]
    InvalidHost { host: String, service: String },

    #[error("Canary weight {weight} is outside 0..=100")]
    InvalidWeight { weight: u32 },

    #[error("Failed to parse {resource}: {message}")]
    Parse {
        resource: &'static str,
        message: String,
    },

    #[error("Failed to serialize {resource}: {message}")]
    Serialize {
        resource: &'static str,
        message: String,
    },
}

/// Chart model and archive errors
#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Chart archive is unreadable: {message}")]
    Archive { message: String },

    #[error("Chart archive has no {file}")]
    MissingFile { file: &'static str },

    #[error("Invalid {file}: {message}")]
    InvalidFile { file: String, message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Hostname template '{template}' has no protocol prefix (expected <protocol>://...)")]
    MissingProtocol { template: String },

    #[error("Hostname template '{template}' uses unknown placeholder ${{{placeholder}}}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },
}

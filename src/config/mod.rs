//! # Service Configuration
//!
//! Loaded from an optional YAML file, then overridden from the environment.
//!
//! ```yaml
//! ingress:
//!   protocol: https
//!   hostname_suffix: example.com
//!   port: 443
//!   gateway: public-gateway.istio-system
//!   create_gateway: false
//! helm:
//!   binary: /usr/local/bin/helm
//!   timeout: 5m
//! store:
//!   root: /var/lib/helm-rollout/charts
//! events:
//!   source: helm-rollout
//!   endpoint: http://event-broker.cd.svc.cluster.local:8080/events
//! ```
//!
//! ## Environment overrides
//!
//! `INGRESS_PROTOCOL`, `INGRESS_HOSTNAME_SUFFIX`, `INGRESS_PORT`,
//! `ISTIO_GATEWAY`, `HOSTNAME_TEMPLATE`, `HELM_BIN`, `HELM_TIMEOUT`,
//! `CHART_STORE_DIR`, `EVENT_ENDPOINT`

mod ingress;

pub use ingress::IngressConfig;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub helm: HelmConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

/// Chart executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmConfig {
    /// Helm binary, looked up on PATH when unset
    #[serde(default)]
    pub binary: Option<String>,

    /// Readiness wait for installs, humantime format (default: "5m")
    #[serde(default = "default_helm_timeout")]
    pub timeout: String,
}

fn default_helm_timeout() -> String {
    "5m".to_string()
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout: default_helm_timeout(),
        }
    }
}

impl HelmConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.timeout).map_err(|e| ConfigError::InvalidValue {
            field: "helm.timeout".to_string(),
            value: format!("{} ({})", self.timeout, e),
        })
    }
}

/// Chart store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the filesystem chart store (default: "./charts")
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./charts")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

/// Outgoing event configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// `source` attribute of emitted events
    #[serde(default = "default_event_source")]
    pub source: String,

    /// HTTP endpoint events are POSTed to; stdout when unset
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_event_source() -> String {
    "helm-rollout".to_string()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            source: default_event_source(),
            endpoint: None,
        }
    }
}

impl RolloutConfig {
    /// Load configuration from `path` (defaults when `None`), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;

        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Apply overrides looked up through `lookup` (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(protocol) = lookup("INGRESS_PROTOCOL") {
            self.ingress.protocol = protocol;
        }
        if let Some(suffix) = lookup("INGRESS_HOSTNAME_SUFFIX") {
            self.ingress.hostname_suffix = suffix;
        }
        if let Some(port) = lookup("INGRESS_PORT") {
            self.ingress.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: "INGRESS_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(gateway) = lookup("ISTIO_GATEWAY") {
            self.ingress.gateway = gateway;
        }
        if let Some(template) = lookup("HOSTNAME_TEMPLATE") {
            self.ingress.hostname_template = template;
        }
        if let Some(binary) = lookup("HELM_BIN") {
            self.helm.binary = Some(binary);
        }
        if let Some(timeout) = lookup("HELM_TIMEOUT") {
            self.helm.timeout = timeout;
        }
        if let Some(root) = lookup("CHART_STORE_DIR") {
            self.store.root = PathBuf::from(root);
        }
        if let Some(endpoint) = lookup("EVENT_ENDPOINT") {
            self.events.endpoint = Some(endpoint).filter(|e| !e.trim().is_empty());
        }
        Ok(())
    }

    /// Reject values that would only fail later, mid-task
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.helm.timeout()?;
        if self.ingress.gateway.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ingress.gateway".to_string(),
                value: String::new(),
            });
        }
        Ok(())
    }
}

//! In-memory Helm chart model
//!
//! A chart is loaded (or synthesized) fresh for every event, edited in place
//! by manipulators, and then either discarded or packaged and stored.

pub mod archive;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::DeploymentStrategy;

pub use archive::{load, package};

/// Directory holding a chart's templates
pub const TEMPLATES_DIR: &str = "templates/";

fn default_api_version() -> String {
    "v2".to_string()
}

/// `Chart.yaml` contents
///
/// Fields this service does not care about are kept in `extra` so they
/// survive a load/package round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A named file inside a chart, path relative to the chart root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl ChartFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub metadata: ChartMetadata,
    /// Parsed `values.yaml`, always a mapping
    pub values: serde_yaml::Value,
    /// Files under `templates/`, in insertion order
    pub templates: Vec<ChartFile>,
    /// Every other file (helpers, README, schema, ...)
    pub files: Vec<ChartFile>,
}

impl Chart {
    /// Create an empty chart
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            metadata: ChartMetadata {
                api_version: default_api_version(),
                name: name.into(),
                version: version.into(),
                description: None,
                app_version: None,
                keywords: Vec::new(),
                extra: BTreeMap::new(),
            },
            values: serde_yaml::Value::Mapping(Default::default()),
            templates: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Add a template, prefixing `templates/` when the name lacks it.
    /// An existing template with the same path is replaced.
    pub fn add_template(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        let path = if name.starts_with(TEMPLATES_DIR) {
            name.to_string()
        } else {
            format!("{}{}", TEMPLATES_DIR, name)
        };
        let data = data.into();

        match self.templates.iter_mut().find(|t| t.name == path) {
            Some(existing) => existing.data = data,
            None => self.templates.push(ChartFile::new(path, data)),
        }
    }

    pub fn template(&self, name: &str) -> Option<&ChartFile> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Templates whose path ends with the given suffix
    pub fn templates_ending_with<'a>(
        &'a self,
        suffix: &'a str,
    ) -> impl Iterator<Item = &'a ChartFile> + 'a {
        self.templates.iter().filter(move |t| t.name.ends_with(suffix))
    }

    /// Strategy recorded in the chart keywords, if any
    pub fn deployment_strategy(&self) -> Option<DeploymentStrategy> {
        DeploymentStrategy::from_keywords(&self.metadata.keywords)
    }

    /// Record a strategy, replacing any previously recorded one
    pub fn set_deployment_strategy(&mut self, strategy: DeploymentStrategy) {
        self.metadata
            .keywords
            .retain(|k| !k.starts_with(crate::domain::strategy::STRATEGY_KEYWORD_PREFIX));
        self.metadata.keywords.push(strategy.keyword());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_template_prefixes_and_replaces() {
        let mut chart = Chart::new("carts", "0.1.0");
        chart.add_template("service.yaml", "a: 1\n");
        chart.add_template("templates/service.yaml", "a: 2\n");

        assert_eq!(chart.templates.len(), 1);
        assert_eq!(
            chart.template("templates/service.yaml").map(|t| t.data.as_slice()),
            Some(b"a: 2\n".as_slice())
        );
    }

    #[test]
    fn test_strategy_keyword() {
        let mut chart = Chart::new("carts-generated", "0.1.0");
        assert_eq!(chart.deployment_strategy(), None);

        chart.set_deployment_strategy(DeploymentStrategy::Direct);
        chart.set_deployment_strategy(DeploymentStrategy::Duplicate);

        assert_eq!(chart.metadata.keywords, vec!["deployment_strategy=duplicate"]);
        assert_eq!(
            chart.deployment_strategy(),
            Some(DeploymentStrategy::Duplicate)
        );
    }

    #[test]
    fn test_metadata_preserves_unknown_fields() {
        let yaml = "apiVersion: v2\nname: carts\nversion: 1.2.3\ntype: application\nkeywords: [shop]\n";
        let metadata: ChartMetadata = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(metadata.keywords, vec!["shop"]);
        assert_eq!(
            metadata.extra.get("type").and_then(|v| v.as_str()),
            Some("application")
        );

        let rendered = serde_yaml::to_string(&metadata).unwrap();
        assert!(rendered.contains("type: application"));
    }
}

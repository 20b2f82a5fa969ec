use serde_yaml::Value;

use super::ChartManipulator;
use crate::chart::Chart;
use crate::domain::manifest::split_documents;
use crate::error::ManipulationError;

/// Kubernetes default when a Deployment omits `spec.replicas`
const DEFAULT_REPLICAS: i64 = 1;

/// Adds `delta` to the replica count of every Deployment in the chart
#[derive(Debug, Clone, Copy)]
pub struct ReplicaCountManipulator {
    delta: i64,
}

impl ReplicaCountManipulator {
    pub fn new(delta: i64) -> Self {
        Self { delta }
    }
}

/// Parse the increment of a `scaling` action (integer or integer string)
pub fn parse_scaling_value(value: &serde_json::Value) -> Result<i64, ManipulationError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ManipulationError::InvalidScalingValue {
        value: match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    })
}

fn is_deployment(document: &Value) -> bool {
    document
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("Deployment"))
}

impl ReplicaCountManipulator {
    fn scale(&self, template: &str, document: &mut Value) -> Result<(), ManipulationError> {
        let name = document
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(root) = document.as_mapping_mut() else {
            return Ok(());
        };
        let spec = root
            .entry("spec".into())
            .or_insert_with(|| Value::Mapping(Default::default()));
        let Some(spec) = spec.as_mapping_mut() else {
            return Err(ManipulationError::TemplateEncoding {
                template: template.to_string(),
                message: format!("Deployment {} has a non-mapping spec", name),
            });
        };

        let current = match spec.get("replicas") {
            None | Some(Value::Null) => DEFAULT_REPLICAS,
            Some(value) => value.as_i64().ok_or_else(|| ManipulationError::TemplateEncoding {
                template: template.to_string(),
                message: format!("Deployment {} has a non-integer replica count", name),
            })?,
        };
        let replicas = match current.checked_add(self.delta) {
            Some(replicas) if replicas >= 0 => replicas,
            other => {
                return Err(ManipulationError::InvalidReplicaCount {
                    template: template.to_string(),
                    name,
                    replicas: other.unwrap_or_else(|| current.saturating_add(self.delta)),
                })
            }
        };

        spec.insert("replicas".into(), Value::from(replicas));
        Ok(())
    }
}

impl ChartManipulator for ReplicaCountManipulator {
    fn manipulate(&self, chart: &mut Chart) -> Result<(), ManipulationError> {
        for template in chart.templates.iter_mut() {
            // Go-templated or binary content is left alone
            let Ok(text) = std::str::from_utf8(&template.data) else {
                continue;
            };
            if text.contains("{{") {
                continue;
            }
            let Ok(mut documents) = split_documents(text)
                .into_iter()
                .map(serde_yaml::from_str::<Value>)
                .collect::<Result<Vec<_>, _>>()
            else {
                continue;
            };
            if !documents.iter().any(is_deployment) {
                continue;
            }

            for document in documents.iter_mut().filter(|d| is_deployment(d)) {
                self.scale(&template.name, document)?;
            }

            let encoded = documents
                .iter()
                .map(serde_yaml::to_string)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ManipulationError::TemplateEncoding {
                    template: template.name.clone(),
                    message: e.to_string(),
                })?;
            template.data = encoded.join("---\n").into_bytes();
        }

        Ok(())
    }
}

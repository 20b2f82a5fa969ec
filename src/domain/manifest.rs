//! Rendered manifest parsing and workload variants
//!
//! A release manifest is the multi-document YAML Helm renders for a chart.
//! Only `Service` and `Deployment` documents matter for chart synthesis;
//! everything else is skipped, and so is any document that does not decode.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Resource;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Label keys whose values identify the workload and get slot suffixes
pub const SELECTOR_KEYS: [&str; 2] = ["app", "app.kubernetes.io/name"];

/// The two workload identities of the duplicate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Receives the newly deployed version under test
    Canary,
    /// Stable, traffic-serving version
    Primary,
}

impl Slot {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Canary => "-canary",
            Self::Primary => "-primary",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Canary => "canary",
            Self::Primary => "primary",
        }
    }

    /// Apply this slot's suffix to a name
    pub fn apply(&self, name: &str) -> String {
        format!("{}{}", name, self.suffix())
    }
}

/// Workloads found in a rendered manifest, in document order
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    pub services: Vec<Service>,
    pub deployments: Vec<Deployment>,
}

impl ParsedManifest {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.deployments.is_empty()
    }
}

/// Split a multi-document YAML stream at `---` marker lines.
///
/// Blank documents (including comment-only ones) are dropped.
pub fn split_documents(text: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- #") {
            documents.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&text[start..]);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        })
        .collect()
}

/// Extract Services and Deployments from a rendered manifest
pub fn parse_manifest(manifest: &str) -> ParsedManifest {
    let mut parsed = ParsedManifest::default();

    for (index, document) in split_documents(manifest).into_iter().enumerate() {
        let value: serde_yaml::Value = match serde_yaml::from_str(document) {
            Ok(value) => value,
            Err(e) => {
                debug!(document = index, error = %e, "Skipping undecodable manifest document");
                continue;
            }
        };

        let Some(kind) = value.get("kind").and_then(|k| k.as_str()).map(str::to_owned) else {
            continue;
        };

        if kind.eq_ignore_ascii_case(Service::KIND) {
            if let Some(service) = decode_resource::<Service>(value, index) {
                parsed.services.push(service);
            }
        } else if kind.eq_ignore_ascii_case(Deployment::KIND) {
            if let Some(deployment) = decode_resource::<Deployment>(value, index) {
                parsed.deployments.push(deployment);
            }
        }
    }

    parsed
}

/// Decode a document as a typed resource, normalizing the `kind` casing first
fn decode_resource<T>(mut value: serde_yaml::Value, index: usize) -> Option<T>
where
    T: Resource + DeserializeOwned,
{
    if let Some(map) = value.as_mapping_mut() {
        map.insert("kind".into(), T::KIND.into());
    }

    match serde_yaml::from_value(value) {
        Ok(resource) => Some(resource),
        Err(e) => {
            debug!(document = index, kind = T::KIND, error = %e, "Skipping malformed resource");
            None
        }
    }
}

/// Name of a resource, or an empty string when the manifest omitted it
pub fn resource_name(metadata: &ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}

/// Canary or primary copy of a Service, stripped of cluster-assigned fields
pub fn service_variant(service: &Service, slot: Slot) -> Service {
    let mut variant = service.clone();
    rename(&mut variant.metadata, slot);
    variant.status = None;

    if let Some(spec) = variant.spec.as_mut() {
        suffix_selector_values(spec.selector.as_mut(), slot);
        spec.cluster_ip = None;
        spec.cluster_ips = None;
        if let Some(ports) = spec.ports.as_mut() {
            for port in ports {
                port.node_port = None;
            }
        }
    }

    variant
}

/// Canary or primary copy of a Deployment, stripped of cluster-assigned fields
pub fn deployment_variant(deployment: &Deployment, slot: Slot) -> Deployment {
    let mut variant = deployment.clone();
    rename(&mut variant.metadata, slot);
    variant.status = None;

    if let Some(spec) = variant.spec.as_mut() {
        suffix_selector_values(spec.selector.match_labels.as_mut(), slot);
        if let Some(metadata) = spec.template.metadata.as_mut() {
            suffix_selector_values(metadata.labels.as_mut(), slot);
        }
    }

    variant
}

fn rename(metadata: &mut ObjectMeta, slot: Slot) {
    metadata.name = metadata.name.as_deref().map(|n| slot.apply(n));
    metadata.namespace = None;
    metadata.resource_version = None;
    metadata.uid = None;
    metadata.creation_timestamp = None;
    metadata.generation = None;
    metadata.managed_fields = None;
    suffix_selector_values(metadata.labels.as_mut(), slot);
}

fn suffix_selector_values(labels: Option<&mut BTreeMap<String, String>>, slot: Slot) {
    let Some(labels) = labels else {
        return;
    };
    for key in SELECTOR_KEYS {
        if let Some(value) = labels.get_mut(key) {
            value.push_str(slot.suffix());
        }
    }
}

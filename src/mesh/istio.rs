//! Istio implementation of the mesh adapter
//!
//! Routing rule = `VirtualService`, destination policy = `DestinationRule`,
//! ingress gateway = `Gateway`. Fields this service does not manage are
//! carried through `extra` maps so weight updates leave them alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Mesh, RouteDestination};
use crate::domain::Slot;
use crate::error::MeshError;

const API_VERSION: &str = "networking.istio.io/v1alpha3";

// =============================================================================
// Istio resources
// =============================================================================

/// Metadata for generated mesh resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeshMetadata {
    /// Resource name
    pub name: String,
    /// Resource namespace, left to the release namespace when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl MeshMetadata {
    /// Create new metadata with the managed-by label
    pub fn new(name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "helm-rollout".to_string(),
        );
        Self {
            name: name.into(),
            namespace: None,
            labels,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    pub api_version: String,
    pub kind: String,
    pub metadata: MeshMetadata,
    pub spec: GatewaySpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewaySpec {
    /// Pods implementing the gateway
    pub selector: BTreeMap<String, String>,
    pub servers: Vec<GatewayServer>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewayServer {
    pub port: GatewayPort,
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GatewayPort {
    pub number: u16,
    pub name: String,
    /// Protocol (HTTP, HTTPS, TCP, GRPC)
    pub protocol: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRule {
    pub api_version: String,
    pub kind: String,
    pub metadata: MeshMetadata,
    pub spec: DestinationRuleSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DestinationRuleSpec {
    pub host: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    pub api_version: String,
    pub kind: String,
    pub metadata: MeshMetadata,
    pub spec: VirtualServiceSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VirtualServiceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<Route>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<Route>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// An HTTP or TCP route; both share the `route` destination list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Route {
    #[serde(default)]
    pub route: Vec<WeightedDestination>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeightedDestination {
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub host: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

// =============================================================================
// Mesh adapter
// =============================================================================

/// Istio mesh adapter
#[derive(Debug, Clone, Default)]
pub struct IstioMesh;

impl IstioMesh {
    pub fn new() -> Self {
        Self
    }
}

fn to_yaml<T: Serialize>(resource: &'static str, value: &T) -> Result<Vec<u8>, MeshError> {
    serde_yaml::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| MeshError::Serialize {
            resource,
            message: e.to_string(),
        })
}

impl Mesh for IstioMesh {
    fn generate_gateway(&self, name: &str) -> Result<Vec<u8>, MeshError> {
        let mut metadata = match name.split_once('.') {
            Some((name, namespace)) => {
                let mut metadata = MeshMetadata::new(name);
                metadata.namespace = Some(namespace.to_string());
                metadata
            }
            None => MeshMetadata::new(name),
        };
        metadata
            .labels
            .insert("app.kubernetes.io/component".to_string(), "gateway".to_string());

        let gateway = Gateway {
            api_version: API_VERSION.to_string(),
            kind: "Gateway".to_string(),
            metadata,
            spec: GatewaySpec {
                selector: BTreeMap::from([("istio".to_string(), "ingressgateway".to_string())]),
                servers: vec![GatewayServer {
                    port: GatewayPort {
                        number: 80,
                        name: "http".to_string(),
                        protocol: "HTTP".to_string(),
                    },
                    hosts: vec!["*".to_string()],
                }],
            },
        };
        to_yaml("Gateway", &gateway)
    }

    fn generate_destination_policy(&self, name: &str, host: &str) -> Result<Vec<u8>, MeshError> {
        let rule = DestinationRule {
            api_version: API_VERSION.to_string(),
            kind: "DestinationRule".to_string(),
            metadata: MeshMetadata::new(name),
            spec: DestinationRuleSpec {
                host: host.to_string(),
                extra: BTreeMap::new(),
            },
        };
        to_yaml("DestinationRule", &rule)
    }

    fn generate_routing_rule(
        &self,
        name: &str,
        gateways: &[String],
        hosts: &[String],
        destinations: &[RouteDestination],
    ) -> Result<Vec<u8>, MeshError> {
        let route = destinations
            .iter()
            .map(|d| WeightedDestination {
                destination: Destination {
                    host: d.host.clone(),
                    extra: BTreeMap::new(),
                },
                weight: d.weight,
                extra: BTreeMap::new(),
            })
            .collect();

        let service = VirtualService {
            api_version: API_VERSION.to_string(),
            kind: "VirtualService".to_string(),
            metadata: MeshMetadata::new(name),
            spec: VirtualServiceSpec {
                hosts: hosts.to_vec(),
                gateways: gateways.to_vec(),
                http: vec![Route {
                    route,
                    extra: BTreeMap::new(),
                }],
                tcp: Vec::new(),
                extra: BTreeMap::new(),
            },
        };
        to_yaml("VirtualService", &service)
    }

    fn update_weights(&self, rule: &[u8], canary_weight: u32) -> Result<Vec<u8>, MeshError> {
        let mut service: VirtualService =
            serde_yaml::from_slice(rule).map_err(|e| MeshError::Parse {
                resource: "VirtualService",
                message: e.to_string(),
            })?;

        let name = service.metadata.name.clone();
        let VirtualServiceSpec { http, tcp, .. } = &mut service.spec;

        for destination in http
            .iter_mut()
            .chain(tcp.iter_mut())
            .flat_map(|r| r.route.iter_mut())
        {
            let host = &destination.destination.host;
            if !host.starts_with(&name) {
                return Err(MeshError::InvalidHost {
                    host: host.clone(),
                    service: name,
                });
            }

            let short_name = host.split('.').next().unwrap_or_default();
            if short_name.ends_with(Slot::Canary.suffix()) {
                destination.weight = Some(canary_weight);
            } else if short_name.ends_with(Slot::Primary.suffix()) {
                let primary = 100u32
                    .checked_sub(canary_weight)
                    .ok_or(MeshError::InvalidWeight {
                        weight: canary_weight,
                    })?;
                destination.weight = Some(primary);
            }
        }

        to_yaml("VirtualService", &service)
    }

    fn destination_policy_suffix(&self) -> &'static str {
        "-istio-destinationrule.yaml"
    }

    fn routing_rule_suffix(&self) -> &'static str {
        "-istio-virtualservice.yaml"
    }

    fn gateway_suffix(&self) -> &'static str {
        "-istio-gateway.yaml"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duplicate_rule() -> Vec<u8> {
        IstioMesh::new()
            .generate_routing_rule(
                "carts",
                &["public-gateway.istio-system".to_string(), "mesh".to_string()],
                &[
                    "carts.sockshop-dev.example.com".to_string(),
                    "carts.sockshop-dev.svc.cluster.local".to_string(),
                ],
                &[
                    RouteDestination::new("carts-canary.sockshop-dev.svc.cluster.local", Some(0)),
                    RouteDestination::new("carts-primary.sockshop-dev.svc.cluster.local", Some(100)),
                ],
            )
            .unwrap()
    }

    fn weights(rule: &[u8]) -> Vec<(String, Option<u32>)> {
        let service: VirtualService = serde_yaml::from_slice(rule).unwrap();
        service
            .spec
            .http
            .iter()
            .chain(service.spec.tcp.iter())
            .flat_map(|r| r.route.iter())
            .map(|d| (d.destination.host.clone(), d.weight))
            .collect()
    }

    #[test]
    fn test_update_weights_across_full_range() {
        let mesh = IstioMesh::new();
        let rule = duplicate_rule();

        for w in 0..=100 {
            let updated = mesh.update_weights(&rule, w).unwrap();
            let weights = weights(&updated);
            assert_eq!(weights[0].1, Some(w));
            assert_eq!(weights[1].1, Some(100 - w));
        }
    }

    #[test]
    fn test_update_weights_rejects_weight_over_100() {
        let err = IstioMesh::new().update_weights(&duplicate_rule(), 101).unwrap_err();
        assert!(matches!(err, MeshError::InvalidWeight { weight: 101 }));
    }

    #[test]
    fn test_update_weights_rejects_foreign_host() {
        let rule = IstioMesh::new()
            .generate_routing_rule(
                "carts",
                &[],
                &[],
                &[RouteDestination::new("orders-canary.sockshop-dev.svc.cluster.local", Some(0))],
            )
            .unwrap();

        let err = IstioMesh::new().update_weights(&rule, 50).unwrap_err();
        assert!(matches!(err, MeshError::InvalidHost { .. }));
    }

    #[test]
    fn test_update_weights_covers_tcp_and_keeps_unknown_fields() {
        let rule = r#"
apiVersion: networking.istio.io/v1alpha3
kind: VirtualService
metadata:
  name: carts
spec:
  hosts: [carts]
  http:
  - retries:
      attempts: 3
    route:
    - destination:
        host: carts-canary.sockshop-dev.svc.cluster.local
      weight: 0
    - destination:
        host: carts-primary.sockshop-dev.svc.cluster.local
      weight: 100
  tcp:
  - route:
    - destination:
        host: carts-canary.sockshop-dev.svc.cluster.local
        port:
          number: 5432
      weight: 0
    - destination:
        host: carts-primary.sockshop-dev.svc.cluster.local
      weight: 100
    - destination:
        host: carts-metrics.sockshop-dev.svc.cluster.local
"#;

        let updated = IstioMesh::new().update_weights(rule.as_bytes(), 30).unwrap();
        let weights = weights(&updated);
        assert_eq!(
            weights.iter().map(|(_, w)| *w).collect::<Vec<_>>(),
            vec![Some(30), Some(70), Some(30), Some(70), None]
        );

        let text = String::from_utf8(updated).unwrap();
        assert!(text.contains("attempts: 3"));
        assert!(text.contains("number: 5432"));
    }

    #[test]
    fn test_update_weights_rejects_malformed_rule() {
        let err = IstioMesh::new().update_weights(b"spec: [", 10).unwrap_err();
        assert!(matches!(err, MeshError::Parse { .. }));
    }

    #[test]
    fn test_direct_rule_has_no_weight() {
        let rule = IstioMesh::new()
            .generate_routing_rule(
                "carts",
                &[],
                &[],
                &[RouteDestination::new("carts.sockshop-dev.svc.cluster.local", None)],
            )
            .unwrap();
        let text = String::from_utf8(rule).unwrap();
        assert!(!text.contains("weight"));
    }

    #[test]
    fn test_gateway_splits_namespace() {
        let gateway = IstioMesh::new()
            .generate_gateway("public-gateway.istio-system")
            .unwrap();
        let gateway: Gateway = serde_yaml::from_slice(&gateway).unwrap();
        assert_eq!(gateway.metadata.name, "public-gateway");
        assert_eq!(gateway.metadata.namespace.as_deref(), Some("istio-system"));
        assert_eq!(gateway.spec.servers[0].port.number, 80);
    }
}

//! Service mesh routing resources
//!
//! The mesh adapter renders the routing resources a generated chart carries
//! and rewrites the canary/primary traffic split of an existing routing rule.

pub mod istio;

use crate::error::MeshError;

pub use istio::IstioMesh;

/// Mesh gateway every routing rule attaches to alongside the ingress gateway
pub const MESH_GATEWAY: &str = "mesh";

/// One weighted destination of a routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDestination {
    /// Fully qualified service host
    pub host: String,
    /// Traffic share in percent, `None` for single-destination routes
    pub weight: Option<u32>,
}

impl RouteDestination {
    pub fn new(host: impl Into<String>, weight: Option<u32>) -> Self {
        Self {
            host: host.into(),
            weight,
        }
    }
}

/// Renders and edits mesh routing resources
pub trait Mesh: Send + Sync {
    /// Ingress gateway named `name` (`<name>.<namespace>` is accepted)
    fn generate_gateway(&self, name: &str) -> Result<Vec<u8>, MeshError>;

    /// Destination policy for traffic sent to `host`
    fn generate_destination_policy(&self, name: &str, host: &str) -> Result<Vec<u8>, MeshError>;

    /// Routing rule splitting traffic for `hosts` across `destinations`
    fn generate_routing_rule(
        &self,
        name: &str,
        gateways: &[String],
        hosts: &[String],
        destinations: &[RouteDestination],
    ) -> Result<Vec<u8>, MeshError>;

    /// Rewrite a routing rule so canary gets `canary_weight` percent and
    /// primary the remainder
    fn update_weights(&self, rule: &[u8], canary_weight: u32) -> Result<Vec<u8>, MeshError>;

    fn destination_policy_suffix(&self) -> &'static str;

    fn routing_rule_suffix(&self) -> &'static str;

    fn gateway_suffix(&self) -> &'static str;
}

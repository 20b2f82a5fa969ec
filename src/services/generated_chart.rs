//! Generated chart synthesis
//!
//! Derives the companion chart of a service from the manifest its user chart
//! rendered. The generated chart carries the mesh routing and, for the
//! duplicate strategy, the canary/primary workload copies.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::chart::Chart;
use crate::config::IngressConfig;
use crate::domain::manifest::{self, deployment_variant, resource_name, service_variant};
use crate::domain::{chart_name, namespace, DeploymentStrategy, Slot};
use crate::error::{ChartError, RolloutError};
use crate::mesh::{Mesh, RouteDestination, MESH_GATEWAY};

/// Version stamped on every generated chart
pub const GENERATED_CHART_VERSION: &str = "0.1.0";

/// Cluster-local FQDN of a service
pub fn cluster_host(service: &str, namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local", service, namespace)
}

/// Builds generated charts for the strategies that need one
#[derive(Clone)]
pub struct ChartSynthesizer {
    ingress: IngressConfig,
    mesh: Arc<dyn Mesh>,
}

impl ChartSynthesizer {
    pub fn new(ingress: IngressConfig, mesh: Arc<dyn Mesh>) -> Self {
        Self { ingress, mesh }
    }

    /// Generated chart for `strategy`; user-managed services have none
    pub fn generate(
        &self,
        strategy: DeploymentStrategy,
        manifest: &str,
        project: &str,
        stage: &str,
        service: &str,
    ) -> Result<Chart, RolloutError> {
        match strategy {
            DeploymentStrategy::Duplicate => {
                self.generate_duplicate_chart(manifest, project, stage, service)
            }
            DeploymentStrategy::Direct => self.generate_mesh_chart(manifest, project, stage, service),
            DeploymentStrategy::UserManaged => Err(RolloutError::Internal(format!(
                "strategy {} has no generated chart",
                strategy
            ))),
        }
    }

    /// Canary and primary copies of every Service, a primary copy of every
    /// Deployment, and a routing rule sending all traffic to primary
    pub fn generate_duplicate_chart(
        &self,
        manifest: &str,
        project: &str,
        stage: &str,
        service: &str,
    ) -> Result<Chart, RolloutError> {
        let parsed = manifest::parse_manifest(manifest);
        let namespace = namespace(project, stage);
        let mut chart = self.empty_chart(service, DeploymentStrategy::Duplicate)?;

        for svc in &parsed.services {
            let name = resource_name(&svc.metadata);
            let mut destinations = Vec::with_capacity(2);

            for (slot, weight) in [(Slot::Canary, 0), (Slot::Primary, 100)] {
                let variant = service_variant(svc, slot);
                let variant_name = slot.apply(name);
                let host = cluster_host(&variant_name, &namespace);

                chart.add_template(
                    &format!("{}-service.yaml", variant_name),
                    encode(&variant_name, &variant)?,
                );
                chart.add_template(
                    &format!("{}{}", variant_name, self.mesh.destination_policy_suffix()),
                    self.mesh.generate_destination_policy(&variant_name, &host).map_err(mesh_error)?,
                );
                destinations.push(RouteDestination::new(host, Some(weight)));
            }

            self.add_routing_rule(&mut chart, project, stage, name, &namespace, &destinations)?;
        }

        for deployment in &parsed.deployments {
            let variant = deployment_variant(deployment, Slot::Primary);
            let variant_name = Slot::Primary.apply(resource_name(&deployment.metadata));
            chart.add_template(
                &format!("{}-deployment.yaml", variant_name),
                encode(&variant_name, &variant)?,
            );
        }

        info!(
            service = %service,
            services = parsed.services.len(),
            deployments = parsed.deployments.len(),
            "Generated duplicate chart"
        );
        Ok(chart)
    }

    /// One routing rule and destination policy per Service, pointing at the
    /// user's own workload
    pub fn generate_mesh_chart(
        &self,
        manifest: &str,
        project: &str,
        stage: &str,
        service: &str,
    ) -> Result<Chart, RolloutError> {
        let parsed = manifest::parse_manifest(manifest);
        let namespace = namespace(project, stage);
        let mut chart = self.empty_chart(service, DeploymentStrategy::Direct)?;

        for svc in &parsed.services {
            let name = resource_name(&svc.metadata);
            let host = cluster_host(name, &namespace);

            chart.add_template(
                &format!("{}{}", name, self.mesh.destination_policy_suffix()),
                self.mesh.generate_destination_policy(name, &host).map_err(mesh_error)?,
            );
            self.add_routing_rule(
                &mut chart,
                project,
                stage,
                name,
                &namespace,
                &[RouteDestination::new(host, None)],
            )?;
        }

        info!(service = %service, services = parsed.services.len(), "Generated mesh chart");
        Ok(chart)
    }

    fn empty_chart(&self, service: &str, strategy: DeploymentStrategy) -> Result<Chart, RolloutError> {
        let mut chart = Chart::new(chart_name(service, true), GENERATED_CHART_VERSION);
        chart.metadata.description = Some(format!("Generated {} chart for {}", strategy, service));
        chart.set_deployment_strategy(strategy);

        if self.ingress.create_gateway {
            let gateway = &self.ingress.gateway;
            let gateway_name = gateway.split('.').next().unwrap_or(gateway);
            chart.add_template(
                &format!("{}{}", gateway_name, self.mesh.gateway_suffix()),
                self.mesh.generate_gateway(gateway).map_err(mesh_error)?,
            );
        }

        Ok(chart)
    }

    fn add_routing_rule(
        &self,
        chart: &mut Chart,
        project: &str,
        stage: &str,
        name: &str,
        namespace: &str,
        destinations: &[RouteDestination],
    ) -> Result<(), RolloutError> {
        let public_host = self.ingress.public_host(project, stage, name)?;
        let gateways = vec![self.ingress.gateway.clone(), MESH_GATEWAY.to_string()];
        let hosts = vec![public_host, cluster_host(name, namespace)];

        debug!(rule = %name, hosts = ?hosts, "Adding routing rule");
        let rule = self
            .mesh
            .generate_routing_rule(name, &gateways, &hosts, destinations)
            .map_err(mesh_error)?;
        chart.add_template(&format!("{}{}", name, self.mesh.routing_rule_suffix()), rule);
        Ok(())
    }
}

fn encode<T: Serialize>(name: &str, resource: &T) -> Result<Vec<u8>, RolloutError> {
    serde_yaml::to_string(resource)
        .map(String::into_bytes)
        .map_err(|e| {
            ChartError::InvalidFile {
                file: name.to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

fn mesh_error(e: crate::error::MeshError) -> RolloutError {
    RolloutError::Manipulation(e.into())
}

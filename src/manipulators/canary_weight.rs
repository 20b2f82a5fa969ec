use std::sync::Arc;

use tracing::debug;

use super::ChartManipulator;
use crate::chart::{Chart, TEMPLATES_DIR};
use crate::error::ManipulationError;
use crate::mesh::Mesh;

/// Sets the canary share of the chart's routing rules
#[derive(Clone)]
pub struct CanaryWeightManipulator {
    mesh: Arc<dyn Mesh>,
    weight: u32,
}

impl CanaryWeightManipulator {
    pub fn new(mesh: Arc<dyn Mesh>, weight: u32) -> Self {
        Self { mesh, weight }
    }
}

impl ChartManipulator for CanaryWeightManipulator {
    fn manipulate(&self, chart: &mut Chart) -> Result<(), ManipulationError> {
        let suffix = self.mesh.routing_rule_suffix();

        for template in chart
            .templates
            .iter_mut()
            .filter(|t| t.name.starts_with(TEMPLATES_DIR) && t.name.ends_with(suffix))
        {
            debug!(template = %template.name, weight = self.weight, "Updating canary weight");
            template.data = self.mesh.update_weights(&template.data, self.weight)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeshError;
    use crate::mesh::{IstioMesh, RouteDestination};

    fn chart_with_rule(mesh: &IstioMesh) -> Chart {
        let rule = mesh
            .generate_routing_rule(
                "carts",
                &[],
                &[],
                &[
                    RouteDestination::new("carts-canary.sockshop-dev.svc.cluster.local", Some(0)),
                    RouteDestination::new("carts-primary.sockshop-dev.svc.cluster.local", Some(100)),
                ],
            )
            .unwrap();

        let mut chart = Chart::new("carts-generated", "0.1.0");
        chart.add_template("carts-canary-service.yaml", "kind: Service\n");
        chart.add_template("carts-istio-virtualservice.yaml", rule);
        chart
    }

    #[test]
    fn test_sets_weights_on_routing_rule() {
        let mesh = IstioMesh::new();
        let mut chart = chart_with_rule(&mesh);

        CanaryWeightManipulator::new(Arc::new(IstioMesh::new()), 100)
            .manipulate(&mut chart)
            .unwrap();

        let rule = chart
            .template("templates/carts-istio-virtualservice.yaml")
            .unwrap();
        let text = String::from_utf8(rule.data.clone()).unwrap();
        assert!(text.contains("weight: 100"));
        assert!(text.contains("weight: 0"));
        assert_eq!(
            chart.template("templates/carts-canary-service.yaml").unwrap().data,
            b"kind: Service\n"
        );
    }

    #[test]
    fn test_no_routing_rule_is_noop() {
        let mut chart = Chart::new("carts", "0.1.0");
        chart.add_template("deployment.yaml", "kind: Deployment\n");
        let before = chart.clone();

        CanaryWeightManipulator::new(Arc::new(IstioMesh::new()), 50)
            .manipulate(&mut chart)
            .unwrap();

        assert_eq!(chart, before);
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        let mesh = IstioMesh::new();
        let mut chart = chart_with_rule(&mesh);

        let err = CanaryWeightManipulator::new(Arc::new(IstioMesh::new()), 150)
            .manipulate(&mut chart)
            .unwrap_err();

        assert!(matches!(
            err,
            ManipulationError::Mesh(MeshError::InvalidWeight { weight: 150 })
        ));
    }
}

use serde_yaml::Value;

use super::ChartManipulator;
use crate::chart::Chart;
use crate::error::ManipulationError;

/// Merges new values into a chart's `values.yaml`
#[derive(Debug, Clone)]
pub struct ValuesManipulator {
    values: Value,
}

impl ValuesManipulator {
    pub fn new(values: Value) -> Self {
        Self { values }
    }
}

impl ChartManipulator for ValuesManipulator {
    fn manipulate(&self, chart: &mut Chart) -> Result<(), ManipulationError> {
        merge_values(&mut chart.values, self.values.clone());
        Ok(())
    }
}

/// Recursively merge `incoming` into `base`.
///
/// Maps merge key by key, sequences concatenate (existing entries first),
/// anything else is replaced by the incoming value.
pub fn merge_values(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Mapping(base), Value::Mapping(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Sequence(base), Value::Sequence(incoming)) => base.extend(incoming),
        (base, incoming) => *base = incoming,
    }
}

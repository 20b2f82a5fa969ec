//! Chart manipulators
//!
//! Each manipulator is one in-place edit of a loaded chart. They are applied
//! by the configuration changer before the chart is packaged and stored.

mod canary_weight;
mod replica_count;
mod values;

pub use canary_weight::CanaryWeightManipulator;
pub use replica_count::{parse_scaling_value, ReplicaCountManipulator};
pub use values::{merge_values, ValuesManipulator};

use crate::chart::Chart;
use crate::error::ManipulationError;

/// An in-place edit of a chart
#[cfg_attr(test, mockall::automock)]
pub trait ChartManipulator: Send + Sync {
    fn manipulate(&self, chart: &mut Chart) -> Result<(), ManipulationError>;
}

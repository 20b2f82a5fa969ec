//! Read → manipulate → package → persist
//!
//! Any failure before the final store leaves the stored chart untouched.
//! There is no locking: two pipelines running for the same chart at once
//! can overwrite each other, and the last store wins.

use std::sync::Arc;

use tracing::debug;

use crate::chart::{self, Chart};
use crate::domain::{chart_name, EventData};
use crate::error::RolloutError;
use crate::infrastructure::{ChartKey, ChartStore};
use crate::manipulators::ChartManipulator;

#[derive(Clone)]
pub struct ConfigurationChanger {
    store: Arc<dyn ChartStore>,
}

impl ConfigurationChanger {
    pub fn new(store: Arc<dyn ChartStore>) -> Self {
        Self { store }
    }

    /// Store key of the user chart (or the generated chart) of a service
    pub fn key(data: &EventData, generated: bool) -> ChartKey {
        ChartKey::new(
            &data.project,
            &data.stage,
            &data.service,
            chart_name(&data.service, generated),
        )
    }

    pub async fn exists(&self, data: &EventData, generated: bool) -> Result<bool, RolloutError> {
        self.store
            .exists(&Self::key(data, generated))
            .await
            .map_err(RolloutError::persistence)
    }

    /// Load a stored chart, `None` when there is none
    pub async fn load_chart(
        &self,
        data: &EventData,
        generated: bool,
    ) -> Result<Option<Chart>, RolloutError> {
        let key = Self::key(data, generated);
        let Some(bytes) = self
            .store
            .get(&key)
            .await
            .map_err(RolloutError::persistence)?
        else {
            return Ok(None);
        };
        Ok(Some(chart::load(&bytes)?))
    }

    /// Package and store a chart as is, returning its version token
    pub async fn store_chart(
        &self,
        data: &EventData,
        chart: &Chart,
        generated: bool,
    ) -> Result<String, RolloutError> {
        let key = Self::key(data, generated);
        let bytes = chart::package(chart)?;
        let version = self
            .store
            .store(&key, bytes)
            .await
            .map_err(RolloutError::persistence)?;

        debug!(chart = %key, version = %version, "Persisted chart");
        Ok(version)
    }

    /// Load the stored chart, apply `manipulator`, and persist the result
    pub async fn update_chart(
        &self,
        data: &EventData,
        generated: bool,
        manipulator: &dyn ChartManipulator,
    ) -> Result<(Chart, String), RolloutError> {
        let chart = self
            .load_chart(data, generated)
            .await?
            .ok_or_else(|| RolloutError::chart_not_found(chart_name(&data.service, generated)))?;
        self.update_loaded_chart(data, chart, generated, manipulator)
            .await
    }

    /// Apply `manipulator` to an in-memory chart and persist the result
    pub async fn update_loaded_chart(
        &self,
        data: &EventData,
        mut chart: Chart,
        generated: bool,
        manipulator: &dyn ChartManipulator,
    ) -> Result<(Chart, String), RolloutError> {
        manipulator.manipulate(&mut chart)?;
        let version = self.store_chart(data, &chart, generated).await?;
        Ok((chart, version))
    }
}

//! Chart persistence
//!
//! Packaged chart bytes are keyed by project/stage/service/chart name. Every
//! store returns a version token (SHA-256 hex of the stored bytes). Tokens are
//! informational only; nothing compares them before writing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::naming::is_label_shaped;

const ARCHIVE_EXTENSION: &str = "tgz";

/// Address of a stored chart
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChartKey {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub chart: String,
}

impl ChartKey {
    pub fn new(
        project: impl Into<String>,
        stage: impl Into<String>,
        service: impl Into<String>,
        chart: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            stage: stage.into(),
            service: service.into(),
            chart: chart.into(),
        }
    }
}

impl std::fmt::Display for ChartKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.stage, self.service, self.chart
        )
    }
}

/// Version token of a chart archive
pub fn version_token(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Persistence of packaged charts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartStore: Send + Sync {
    /// Store chart bytes, returning the new version token
    async fn store(&self, key: &ChartKey, bytes: Vec<u8>) -> Result<String>;

    /// Read chart bytes, `None` when nothing is stored under the key
    async fn get(&self, key: &ChartKey) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &ChartKey) -> Result<bool>;

    /// Delete a chart; deleting a missing chart succeeds
    async fn delete(&self, key: &ChartKey) -> Result<()>;
}

/// Stages known for a project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StageCatalog: Send + Sync {
    async fn stages(&self, project: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Filesystem store
// =============================================================================

/// Chart store laid out as `<root>/<project>/<stage>/<service>/<chart>.tgz`
#[derive(Debug, Clone)]
pub struct FsChartStore {
    root: PathBuf,
}

impl FsChartStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive path for `key`; every segment must be label shaped so the
    /// path cannot leave the root
    fn path(&self, key: &ChartKey) -> Result<PathBuf> {
        for segment in [&key.project, &key.stage, &key.service, &key.chart] {
            ensure_segment(segment)?;
        }
        Ok(self
            .root
            .join(&key.project)
            .join(&key.stage)
            .join(&key.service)
            .join(format!("{}.{}", key.chart, ARCHIVE_EXTENSION)))
    }
}

fn ensure_segment(segment: &str) -> Result<()> {
    if !is_label_shaped(segment) {
        bail!("Invalid chart store path segment {:?}", segment);
    }
    Ok(())
}

#[async_trait]
impl ChartStore for FsChartStore {
    async fn store(&self, key: &ChartKey, bytes: Vec<u8>) -> Result<String> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let token = version_token(&bytes);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(chart = %key, version = %token, "Stored chart");
        Ok(token)
    }

    async fn get(&self, key: &ChartKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn exists(&self, key: &ChartKey) -> Result<bool> {
        let path = self.path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))
    }

    async fn delete(&self, key: &ChartKey) -> Result<()> {
        let path = self.path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(chart = %key, "Deleted chart");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

#[async_trait]
impl StageCatalog for FsChartStore {
    /// Stage directories under the project directory, sorted
    async fn stages(&self, project: &str) -> Result<Vec<String>> {
        ensure_segment(project)?;
        let dir = self.root.join(project);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", dir.display()))
            }
        };

        let mut stages = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                stages.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(stages.into_iter().collect())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Chart store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryChartStore {
    charts: Mutex<BTreeMap<ChartKey, Vec<u8>>>,
}

impl InMemoryChartStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn charts(&self) -> std::sync::MutexGuard<'_, BTreeMap<ChartKey, Vec<u8>>> {
        self.charts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keys currently stored, in order
    pub fn keys(&self) -> Vec<ChartKey> {
        self.charts().keys().cloned().collect()
    }
}

#[async_trait]
impl ChartStore for InMemoryChartStore {
    async fn store(&self, key: &ChartKey, bytes: Vec<u8>) -> Result<String> {
        let token = version_token(&bytes);
        self.charts().insert(key.clone(), bytes);
        Ok(token)
    }

    async fn get(&self, key: &ChartKey) -> Result<Option<Vec<u8>>> {
        Ok(self.charts().get(key).cloned())
    }

    async fn exists(&self, key: &ChartKey) -> Result<bool> {
        Ok(self.charts().contains_key(key))
    }

    async fn delete(&self, key: &ChartKey) -> Result<()> {
        self.charts().remove(key);
        Ok(())
    }
}

#[async_trait]
impl StageCatalog for InMemoryChartStore {
    async fn stages(&self, project: &str) -> Result<Vec<String>> {
        let stages: BTreeSet<String> = self
            .charts()
            .keys()
            .filter(|k| k.project == project)
            .map(|k| k.stage.clone())
            .collect();
        Ok(stages.into_iter().collect())
    }
}

/// A fixed list of stages, for projects whose stages are configured up front
#[derive(Debug, Clone, Default)]
pub struct StaticStageCatalog {
    stages: Vec<String>,
}

impl StaticStageCatalog {
    pub fn new(stages: Vec<String>) -> Self {
        Self { stages }
    }
}

#[async_trait]
impl StageCatalog for StaticStageCatalog {
    async fn stages(&self, _project: &str) -> Result<Vec<String>> {
        Ok(self.stages.clone())
    }
}

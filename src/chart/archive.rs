//! Chart archive codec (`.tgz`)
//!
//! Archives lay files out as `<chart>/Chart.yaml`, `<chart>/values.yaml`,
//! `<chart>/templates/*` plus any other files. Headers are normalized
//! (mtime 0, mode 0644) so packaging the same chart twice yields the same
//! bytes, and therefore the same version token.

use std::io::Read;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};

use super::{Chart, ChartFile, ChartMetadata, TEMPLATES_DIR};
use crate::error::ChartError;

const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";

fn archive_error(e: impl std::fmt::Display) -> ChartError {
    ChartError::Archive {
        message: e.to_string(),
    }
}

/// Package a chart into gzip-compressed tar bytes
pub fn package(chart: &Chart) -> Result<Vec<u8>, ChartError> {
    let metadata = serde_yaml::to_string(&chart.metadata).map_err(|e| ChartError::InvalidFile {
        file: CHART_FILE.to_string(),
        message: e.to_string(),
    })?;
    let values = serde_yaml::to_string(&chart.values).map_err(|e| ChartError::InvalidFile {
        file: VALUES_FILE.to_string(),
        message: e.to_string(),
    })?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    let root = chart.name();

    append_file(&mut builder, root, CHART_FILE, metadata.as_bytes())?;
    append_file(&mut builder, root, VALUES_FILE, values.as_bytes())?;
    for file in chart.templates.iter().chain(chart.files.iter()) {
        append_file(&mut builder, root, &file.name, &file.data)?;
    }

    let encoder = builder.into_inner().map_err(archive_error)?;
    encoder.finish().map_err(archive_error)
}

fn append_file<W: std::io::Write>(
    builder: &mut Builder<W>,
    root: &str,
    name: &str,
    data: &[u8],
) -> Result<(), ChartError> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    builder
        .append_data(&mut header, format!("{}/{}", root, name), data)
        .map_err(archive_error)
}

/// Load a chart from gzip-compressed tar bytes
pub fn load(bytes: &[u8]) -> Result<Chart, ChartError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let mut metadata: Option<ChartMetadata> = None;
    let mut values: Option<serde_yaml::Value> = None;
    let mut templates = Vec::new();
    let mut files = Vec::new();

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path().map_err(archive_error)?.to_string_lossy().into_owned();
        // Strip the leading chart directory
        let Some((_, name)) = path.split_once('/') else {
            continue;
        };
        let name = name.to_string();

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(archive_error)?;

        if name == CHART_FILE {
            metadata = Some(serde_yaml::from_slice(&data).map_err(|e| {
                ChartError::InvalidFile {
                    file: CHART_FILE.to_string(),
                    message: e.to_string(),
                }
            })?);
        } else if name == VALUES_FILE {
            values = Some(serde_yaml::from_slice(&data).map_err(|e| {
                ChartError::InvalidFile {
                    file: VALUES_FILE.to_string(),
                    message: e.to_string(),
                }
            })?);
        } else if name.starts_with(TEMPLATES_DIR) {
            templates.push(ChartFile::new(name, data));
        } else {
            files.push(ChartFile::new(name, data));
        }
    }

    let metadata = metadata.ok_or(ChartError::MissingFile { file: CHART_FILE })?;
    let values = match values {
        Some(serde_yaml::Value::Null) | None => serde_yaml::Value::Mapping(Default::default()),
        Some(values) => values,
    };

    Ok(Chart {
        metadata,
        values,
        templates,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeploymentStrategy;

    fn sample_chart() -> Chart {
        let mut chart = Chart::new("carts-generated", "0.1.0");
        chart.metadata.description = Some("Generated chart".to_string());
        chart.set_deployment_strategy(DeploymentStrategy::Duplicate);
        chart.values = serde_yaml::from_str("image: carts:0.1.0\nreplicaCount: 1\n").unwrap();
        chart.add_template("carts-canary-service.yaml", "kind: Service\n");
        chart.add_template("carts-istio-virtualservice.yaml", "kind: VirtualService\n");
        chart.files.push(ChartFile::new("README.md", "# carts\n"));
        chart
    }

    #[test]
    fn test_package_load_preserves_chart() {
        let chart = sample_chart();
        let bytes = package(&chart).unwrap();
        let loaded = load(&bytes).unwrap();

        assert_eq!(loaded.name(), "carts-generated");
        assert_eq!(loaded.metadata.keywords, chart.metadata.keywords);
        assert_eq!(loaded.values, chart.values);
        let names: Vec<&str> = loaded.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "templates/carts-canary-service.yaml",
                "templates/carts-istio-virtualservice.yaml"
            ]
        );
        assert_eq!(loaded.files, chart.files);
    }

    #[test]
    fn test_package_is_deterministic() {
        let chart = sample_chart();
        assert_eq!(package(&chart).unwrap(), package(&chart).unwrap());
    }

    #[test]
    fn test_load_without_chart_yaml_fails() {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        append_file(&mut builder, "carts", VALUES_FILE, b"a: 1\n").unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            load(&bytes),
            Err(ChartError::MissingFile { file: "Chart.yaml" })
        ));
    }

    #[test]
    fn test_load_garbage_fails() {
        assert!(matches!(
            load(b"definitely not a tarball"),
            Err(ChartError::Archive { .. })
        ));
    }

    #[test]
    fn test_missing_values_default_to_empty_map() {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        append_file(&mut builder, "carts", CHART_FILE, b"name: carts\nversion: 0.1.0\n").unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let chart = load(&bytes).unwrap();
        assert!(chart.values.as_mapping().is_some_and(|m| m.is_empty()));
        assert_eq!(chart.metadata.api_version, "v2");
    }
}

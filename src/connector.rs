//! Connector boundary: materializes a tabular source into a frame.
//!
//! The core consumes rows and raw error text only; storage specifics stay
//! behind this module.

use crate::error::{ConnectorError, Result};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Where a dataset comes from.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    CsvPath(PathBuf),
    ParquetPath(PathBuf),
    JsonPath(PathBuf),
    /// Already-materialized frame, used by embedding callers and tests.
    Frame(DataFrame),
}

impl SourceDescriptor {
    /// Pick a descriptor from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConnectorError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(SourceDescriptor::CsvPath(path.to_path_buf())),
            Some("parquet") => Ok(SourceDescriptor::ParquetPath(path.to_path_buf())),
            Some("json") => Ok(SourceDescriptor::JsonPath(path.to_path_buf())),
            other => Err(ConnectorError::FormatError(format!(
                "unsupported source extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

pub fn load_dataset(source: &SourceDescriptor) -> Result<DataFrame> {
    match source {
        SourceDescriptor::CsvPath(path) => {
            check_exists(path)?;
            let frame = LazyCsvReader::new(path)
                .with_try_parse_dates(true)
                .with_infer_schema_length(Some(1000))
                .finish()
                .map_err(|e| ConnectorError::FormatError(format!("failed to read CSV: {e}")))?
                .collect()
                .map_err(|e| ConnectorError::FormatError(format!("failed to collect CSV: {e}")))?;
            Ok(frame)
        }
        SourceDescriptor::ParquetPath(path) => {
            check_exists(path)?;
            let frame = LazyFrame::scan_parquet(path, ScanArgsParquet::default())
                .map_err(|e| ConnectorError::FormatError(format!("failed to scan parquet: {e}")))?
                .collect()
                .map_err(|e| {
                    ConnectorError::FormatError(format!("failed to collect parquet: {e}"))
                })?;
            Ok(frame)
        }
        SourceDescriptor::JsonPath(path) => {
            check_exists(path)?;
            let file = std::fs::File::open(path)
                .map_err(|e| ConnectorError::ConnectionError(e.to_string()))?;
            let frame = JsonReader::new(file)
                .finish()
                .map_err(|e| ConnectorError::FormatError(format!("failed to read JSON: {e}")))?;
            Ok(frame)
        }
        SourceDescriptor::Frame(frame) => Ok(frame.clone()),
    }
}

fn check_exists(path: &Path) -> std::result::Result<(), ConnectorError> {
    if !path.exists() {
        return Err(ConnectorError::NotFound(path.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn missing_file_is_not_found() {
        let source = SourceDescriptor::CsvPath(PathBuf::from("/nonexistent/file.csv"));
        let err = load_dataset(&source).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn descriptor_from_extension() {
        assert!(matches!(
            SourceDescriptor::from_path("data.csv"),
            Ok(SourceDescriptor::CsvPath(_))
        ));
        assert!(SourceDescriptor::from_path("data.xyz").is_err());
    }

    #[test]
    fn inline_frames_pass_through() {
        let frame = df!["a" => [1, 2]].unwrap();
        let loaded = load_dataset(&SourceDescriptor::Frame(frame.clone())).unwrap();
        assert_eq!(loaded.height(), frame.height());
    }
}

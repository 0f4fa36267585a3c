//! Dataset representation with inferred schema and per-column statistics.
//!
//! A dataset is immutable once registered: the registry hands out
//! `Arc<Dataset>` snapshots, so in-flight resolutions are never affected by
//! a concurrent re-registration.

use crate::error::Result;
use crate::schema::SemanticSchema;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

const SAMPLE_VALUES: usize = 3;

/// Inferred column type, coarser than the physical dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    Text,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

/// Descriptive statistics for one column, computed at registration time and
/// consumed by chart-axis inference and suggestion generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub null_ratio: f64,
    pub distinct_count: usize,
    pub sample_values: Vec<String>,
}

/// A named, schema-described tabular data source.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub description: String,
    frame: DataFrame,
    profile: Vec<ColumnProfile>,
    pub semantic: Option<SemanticSchema>,
}

impl Dataset {
    /// Build a dataset from a materialized frame. The frame is preprocessed
    /// for SQL compatibility (column names sanitized, ISO-looking text
    /// columns parsed as dates), profiled, and validated against the
    /// optional semantic schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        frame: DataFrame,
        semantic: Option<SemanticSchema>,
    ) -> Result<Self> {
        let name = name.into();
        let frame = preprocess_frame(frame)?;
        let profile = profile_frame(&frame)?;

        if let Some(schema) = &semantic {
            schema.validate(&name, &profile)?;
        }

        Ok(Self {
            name,
            description: description.into(),
            frame,
            profile,
            semantic,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn profile(&self) -> &[ColumnProfile] {
        &self.profile
    }

    pub fn column_names(&self) -> Vec<String> {
        self.profile.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.profile.iter().find(|c| c.name == name)
    }

    pub fn numeric_columns(&self) -> Vec<&ColumnProfile> {
        self.profile.iter().filter(|c| c.column_type.is_numeric()).collect()
    }

    pub fn date_columns(&self) -> Vec<&ColumnProfile> {
        self.profile
            .iter()
            .filter(|c| c.column_type == ColumnType::Date)
            .collect()
    }

    pub fn categorical_columns(&self, limit: usize) -> Vec<&ColumnProfile> {
        self.profile
            .iter()
            .filter(|c| c.column_type == ColumnType::Text && c.distinct_count <= limit)
            .collect()
    }

    /// Compact one-line schema rendering used in generation prompts.
    pub fn schema_summary(&self) -> String {
        let columns = self
            .profile
            .iter()
            .map(|c| {
                let type_tag = format!("{:?}", c.column_type).to_lowercase();
                let mut entry = format!("{} [{}", c.name, type_tag);
                if c.nullable {
                    entry.push_str(", nullable");
                }
                if let Some(sample) = c.sample_values.first() {
                    entry.push_str(&format!(", e.g. {sample}"));
                }
                entry.push(']');
                entry
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut summary = format!("{} ({} rows): {}", self.name, self.frame.height(), columns);
        if !self.description.is_empty() {
            summary.push_str(&format!(" ({})", self.description));
        }
        summary
    }
}

/// Prepare a frame for SQL execution: sanitize column names and parse
/// ISO-formatted text columns into dates.
fn preprocess_frame(mut frame: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for name in &names {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if sanitized != *name {
            frame.rename(name, &sanitized)?;
        }
    }

    let names: Vec<String> = frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for name in &names {
        let series = frame.column(name)?.clone();
        if series.dtype() != &DataType::String {
            continue;
        }
        if !looks_like_iso_dates(&series) {
            continue;
        }
        // Accept the parse only when it introduces no new nulls.
        if let Ok(parsed) = series.cast(&DataType::Date) {
            if parsed.null_count() == series.null_count() {
                frame.replace(name, parsed)?;
            }
        }
    }

    Ok(frame)
}

fn looks_like_iso_dates(series: &Series) -> bool {
    let Ok(strings) = series.str() else {
        return false;
    };
    let pattern = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex");
    let mut seen = 0usize;
    for value in strings.into_iter().flatten().take(20) {
        if !pattern.is_match(value) {
            return false;
        }
        seen += 1;
    }
    seen > 0
}

fn profile_frame(frame: &DataFrame) -> Result<Vec<ColumnProfile>> {
    let height = frame.height();
    let mut profile = Vec::with_capacity(frame.width());

    for series in frame.get_columns() {
        let column_type = infer_column_type(series.dtype());
        let null_count = series.null_count();
        let null_ratio = if height == 0 {
            0.0
        } else {
            null_count as f64 / height as f64
        };
        let distinct_count = series.n_unique()?;
        let sample_values = sample_values(series);

        profile.push(ColumnProfile {
            name: series.name().to_string(),
            column_type,
            nullable: null_count > 0,
            null_ratio,
            distinct_count,
            sample_values,
        });
    }

    Ok(profile)
}

fn infer_column_type(dtype: &DataType) -> ColumnType {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnType::Integer,
        DataType::Float32 | DataType::Float64 => ColumnType::Float,
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date | DataType::Datetime(_, _) => ColumnType::Date,
        _ => ColumnType::Text,
    }
}

fn sample_values(series: &Series) -> Vec<String> {
    let mut samples = Vec::new();
    for idx in 0..series.len() {
        if samples.len() >= SAMPLE_VALUES {
            break;
        }
        let Ok(value) = series.get(idx) else { continue };
        if value.is_null() {
            continue;
        }
        let rendered = match value {
            AnyValue::String(s) => format!("\"{s}\""),
            other => other.to_string(),
        };
        samples.push(rendered);
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sales_frame() -> DataFrame {
        df![
            "month" => ["Jan", "Feb", "Mar"],
            "total" => [10.0, 20.5, 30.0]
        ]
        .unwrap()
    }

    #[test]
    fn profiles_columns_with_types_and_samples() {
        let dataset = Dataset::new("sales", "", sales_frame(), None).unwrap();

        let month = dataset.column("month").unwrap();
        assert_eq!(month.column_type, ColumnType::Text);
        assert_eq!(month.distinct_count, 3);
        assert_eq!(month.sample_values[0], "\"Jan\"");

        let total = dataset.column("total").unwrap();
        assert!(total.column_type.is_numeric());
        assert!(!total.nullable);
    }

    #[test]
    fn sanitizes_column_names_for_sql() {
        let frame = df!["order id" => [1, 2], "value (usd)" => [5.0, 6.0]].unwrap();
        let dataset = Dataset::new("orders", "", frame, None).unwrap();
        assert!(dataset.column("order_id").is_some());
        assert!(dataset.column("value__usd_").is_some());
    }

    #[test]
    fn parses_iso_text_columns_as_dates() {
        let frame = df![
            "day" => ["2024-01-01", "2024-01-02"],
            "hits" => [4i64, 7]
        ]
        .unwrap();
        let dataset = Dataset::new("traffic", "", frame, None).unwrap();
        assert_eq!(dataset.column("day").unwrap().column_type, ColumnType::Date);
    }

    #[test]
    fn schema_summary_is_compact() {
        let dataset = Dataset::new("sales", "monthly totals", sales_frame(), None).unwrap();
        let summary = dataset.schema_summary();
        assert!(summary.starts_with("sales (3 rows):"));
        assert!(summary.contains("month [text"));
        assert!(summary.contains("monthly totals"));
    }
}

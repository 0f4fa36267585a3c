//! Chart descriptor and inference.
//!
//! Produces a chart-library-agnostic descriptor: kind, axis bindings, the
//! extracted series, and a title. When the caller supplies no parameters,
//! kind and axes are inferred from question keywords and column
//! cardinality. Inference is deterministic: same frame, same question, same
//! descriptor.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
}

impl std::str::FromStr for ChartKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "area" => Ok(ChartKind::Area),
            "scatter" => Ok(ChartKind::Scatter),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub category_column: String,
    pub value_column: String,
    pub categories: Vec<String>,
    pub values: Vec<f64>,
    pub title: String,
}

/// Explicit parameters from the caller; any `None` falls back to inference.
#[derive(Debug, Clone, Default)]
pub struct ChartRequest {
    pub chart_type: Option<ChartKind>,
    pub x_column: Option<String>,
    pub y_column: Option<String>,
    pub title: Option<String>,
}

const ID_LIKE: [&str; 4] = ["id", "code", "codigo", "código"];
const DATE_LIKE: [&str; 13] = [
    "date", "data", "month", "mes", "mês", "year", "ano", "day", "dia", "period", "período",
    "periodo", "time",
];

pub fn build_chart(
    frame: &DataFrame,
    question: &str,
    request: &ChartRequest,
    config: &EngineConfig,
) -> Result<ChartSpec> {
    if frame.height() == 0 || frame.width() == 0 {
        return Err(EngineError::Configuration(
            "cannot chart an empty result".to_string(),
        ));
    }

    let x_column = match &request.x_column {
        Some(x) => {
            ensure_column(frame, x)?;
            x.clone()
        }
        None => pick_category_column(frame, config),
    };
    let y_column = match &request.y_column {
        Some(y) => {
            ensure_column(frame, y)?;
            y.clone()
        }
        None => pick_value_column(frame, &x_column).ok_or_else(|| {
            EngineError::Configuration("no numeric column available for the value axis".to_string())
        })?,
    };

    let values = numeric_values(frame, &y_column)?;
    let categories = category_labels(frame, &x_column)?;

    let kind = request
        .chart_type
        .unwrap_or_else(|| infer_kind(frame, question, &x_column, &values, config));

    let title = request.title.clone().unwrap_or_else(|| {
        let mut title = format!("{y_column} per {x_column}");
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        title
    });

    Ok(ChartSpec {
        kind,
        category_column: x_column,
        value_column: y_column,
        categories,
        values,
        title,
    })
}

fn ensure_column(frame: &DataFrame, name: &str) -> Result<()> {
    if !frame.get_column_names().iter().any(|c| *c == name) {
        return Err(EngineError::Configuration(format!(
            "column '{name}' not found in the result"
        )));
    }
    Ok(())
}

/// First date/time column, else first low-cardinality or date-named text
/// column, else the first column.
fn pick_category_column(frame: &DataFrame, config: &EngineConfig) -> String {
    for series in frame.get_columns() {
        if is_temporal(series.dtype()) {
            return series.name().to_string();
        }
    }
    for series in frame.get_columns() {
        let name = series.name().to_lowercase();
        let is_text = !series.dtype().is_numeric();
        let low_cardinality = series
            .n_unique()
            .map(|n| n <= config.low_cardinality_limit)
            .unwrap_or(false);
        if is_text && (low_cardinality || DATE_LIKE.contains(&name.as_str())) {
            return series.name().to_string();
        }
    }
    frame.get_columns()[0].name().to_string()
}

/// First numeric column that is not the category axis and not id-like.
fn pick_value_column(frame: &DataFrame, x_column: &str) -> Option<String> {
    let preferred = frame.get_columns().iter().find(|series| {
        series.dtype().is_numeric()
            && series.name() != x_column
            && !ID_LIKE.contains(&series.name().to_lowercase().as_str())
    });
    let fallback = frame
        .get_columns()
        .iter()
        .find(|series| series.dtype().is_numeric() && series.name() != x_column);
    preferred.or(fallback).map(|s| s.name().to_string())
}

fn infer_kind(
    frame: &DataFrame,
    question: &str,
    x_column: &str,
    values: &[f64],
    config: &EngineConfig,
) -> ChartKind {
    let question = question.to_lowercase();

    // Explicit intent in the question wins.
    if contains_any(&question, &["pie", "pizza", "distribution", "distribuição", "share"]) {
        return ChartKind::Pie;
    }
    if contains_any(&question, &["area", "área"]) {
        return ChartKind::Area;
    }
    if contains_any(
        &question,
        &["line", "linha", "trend", "tendência", "evolution", "evolução", "over time", "ao longo"],
    ) {
        return ChartKind::Line;
    }
    if contains_any(&question, &["scatter", "dispersão", "correlation", "correlação"]) {
        return ChartKind::Scatter;
    }

    let x_series = frame.column(x_column).ok();
    let distinct = x_series
        .and_then(|s| s.n_unique().ok())
        .unwrap_or(frame.height());
    // Time-likeness is decided by the physical dtype; date-looking names
    // only influence axis choice, not the chart kind.
    let time_like = x_series.map(|s| is_temporal(s.dtype())).unwrap_or(false);

    if time_like && distinct > 1 {
        return ChartKind::Line;
    }

    let numeric_columns = frame
        .get_columns()
        .iter()
        .filter(|s| s.dtype().is_numeric())
        .count();
    let non_negative = values.iter().all(|v| *v >= 0.0);
    if numeric_columns == 1 && distinct < config.pie_category_limit && non_negative {
        return ChartKind::Pie;
    }

    ChartKind::Bar
}

fn contains_any(question: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| question.contains(cue))
}

fn is_temporal(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Date | DataType::Datetime(_, _))
}

fn numeric_values(frame: &DataFrame, column: &str) -> Result<Vec<f64>> {
    let series = frame.column(column)?.cast(&DataType::Float64)?;
    let values = series.f64()?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn category_labels(frame: &DataFrame, column: &str) -> Result<Vec<String>> {
    let series = frame.column(column)?;
    let mut labels = Vec::with_capacity(series.len());
    for idx in 0..series.len() {
        let value = series.get(idx)?;
        let label = match value {
            AnyValue::String(s) => s.to_string(),
            AnyValue::Null => String::new(),
            other => other.to_string(),
        };
        labels.push(label);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn months_frame(n: usize) -> DataFrame {
        let months: Vec<String> = (1..=n).map(|i| format!("M{i:02}")).collect();
        let totals: Vec<f64> = (1..=n).map(|i| i as f64 * 10.0).collect();
        df!["month" => months, "total" => totals].unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn twelve_categories_render_as_bar_not_pie() {
        let spec = build_chart(
            &months_frame(12),
            "total de vendas por mês",
            &ChartRequest::default(),
            &config(),
        )
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.category_column, "month");
        assert_eq!(spec.value_column, "total");
        assert_eq!(spec.categories.len(), 12);
    }

    #[test]
    fn few_categories_render_as_pie() {
        let spec = build_chart(
            &months_frame(4),
            "totals per quarter",
            &ChartRequest::default(),
            &config(),
        )
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Pie);
    }

    #[test]
    fn question_keyword_overrides_structure() {
        let spec = build_chart(
            &months_frame(12),
            "show the trend over time",
            &ChartRequest::default(),
            &config(),
        )
        .unwrap();
        assert_eq!(spec.kind, ChartKind::Line);
    }

    #[test]
    fn inference_is_deterministic() {
        let frame = months_frame(12);
        let a = build_chart(&frame, "totais por mês", &ChartRequest::default(), &config()).unwrap();
        let b = build_chart(&frame, "totais por mês", &ChartRequest::default(), &config()).unwrap();
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.category_column, b.category_column);
        assert_eq!(a.value_column, b.value_column);
        assert_eq!(a.title, b.title);
    }

    #[test]
    fn id_columns_are_skipped_for_the_value_axis() {
        let frame = df![
            "region" => ["N", "S"],
            "id" => [1i64, 2],
            "revenue" => [5.0, 7.0]
        ]
        .unwrap();
        let spec =
            build_chart(&frame, "revenue by region", &ChartRequest::default(), &config()).unwrap();
        assert_eq!(spec.value_column, "revenue");
    }

    #[test]
    fn explicit_parameters_are_respected() {
        let request = ChartRequest {
            chart_type: Some(ChartKind::Line),
            x_column: Some("month".to_string()),
            y_column: Some("total".to_string()),
            title: Some("Custom".to_string()),
        };
        let spec = build_chart(&months_frame(3), "whatever", &request, &config()).unwrap();
        assert_eq!(spec.kind, ChartKind::Line);
        assert_eq!(spec.title, "Custom");
    }
}

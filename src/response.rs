//! Typed results returned to callers, plus extraction from the sandbox's
//! result envelope.

use crate::chart::{build_chart, ChartRequest, ChartSpec};
use crate::config::EngineConfig;
use crate::error::{ExecutionError, ExecutionErrorKind, Result};
use crate::llm::OutputKind;
use crate::sandbox::{ResultEnvelope, ScriptValue};
use polars::prelude::*;
use serde::Serialize;
use tracing::warn;

/// The unit returned to callers. Exactly one variant is populated; the tag
/// is present even on degraded success (a chart request that could not be
/// charted comes back as a dataframe).
#[derive(Debug, Clone)]
pub enum TypedResult {
    Dataframe(DataFrame),
    Chart(ChartSpec),
    Number(f64),
    Text(String),
}

impl TypedResult {
    pub fn type_tag(&self) -> &'static str {
        match self {
            TypedResult::Dataframe(_) => "dataframe",
            TypedResult::Chart(_) => "chart",
            TypedResult::Number(_) => "number",
            TypedResult::Text(_) => "string",
        }
    }

    /// Short description used for conversation memory and logs.
    pub fn summary(&self) -> String {
        match self {
            TypedResult::Dataframe(frame) => {
                format!("dataframe with {} rows and {} columns", frame.height(), frame.width())
            }
            TypedResult::Chart(spec) => format!(
                "{:?} chart of {} by {}",
                spec.kind, spec.value_column, spec.category_column
            )
            .to_lowercase(),
            TypedResult::Number(value) => format!("number {value}"),
            TypedResult::Text(text) => {
                let mut preview = text.chars().take(80).collect::<String>();
                if text.chars().count() > 80 {
                    preview.push('…');
                }
                format!("text: {preview}")
            }
        }
    }

    /// JSON rendering for transport layers.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            TypedResult::Dataframe(frame) => serde_json::json!({
                "type": "dataframe",
                "value": dataframe_to_json(frame)?,
            }),
            TypedResult::Chart(spec) => serde_json::json!({
                "type": "chart",
                "value": serde_json::to_value(spec)?,
            }),
            TypedResult::Number(value) => serde_json::json!({
                "type": "number",
                "value": value,
            }),
            TypedResult::Text(text) => serde_json::json!({
                "type": "string",
                "value": text,
            }),
        };
        Ok(value)
    }
}

/// Turn a sandbox envelope into a typed result, honoring the declared tag.
///
/// A `chart` declaration over a dataframe goes through chart inference with
/// the original question; when inference cannot find a value axis the
/// result degrades to a table rather than failing the attempt.
pub fn classify_envelope(
    envelope: ResultEnvelope,
    question: &str,
    config: &EngineConfig,
) -> Result<TypedResult> {
    match (envelope.declared, envelope.value) {
        (OutputKind::Dataframe, ScriptValue::Frame(frame)) => Ok(TypedResult::Dataframe(frame)),
        (OutputKind::Number, ScriptValue::Number(value)) => Ok(TypedResult::Number(value)),
        (OutputKind::Number, ScriptValue::Frame(frame)) => scalar_from_frame(&frame)
            .map(TypedResult::Number)
            .ok_or_else(|| mismatch("number", "a non-scalar dataframe")),
        (OutputKind::String, ScriptValue::Text(text)) => Ok(TypedResult::Text(text)),
        (OutputKind::String, ScriptValue::Number(value)) => Ok(TypedResult::Text(value.to_string())),
        (OutputKind::Chart, ScriptValue::Frame(frame)) => {
            match build_chart(&frame, question, &ChartRequest::default(), config) {
                Ok(spec) => Ok(TypedResult::Chart(spec)),
                Err(e) => {
                    warn!("chart inference failed, returning table instead: {e}");
                    Ok(TypedResult::Dataframe(frame))
                }
            }
        }
        (declared, value) => Err(mismatch(tag_of(declared), value.type_name())),
    }
}

fn tag_of(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Dataframe => "dataframe",
        OutputKind::Chart => "chart",
        OutputKind::Number => "number",
        OutputKind::String => "string",
    }
}

fn mismatch(declared: &str, actual: &str) -> crate::error::EngineError {
    ExecutionError::new(
        ExecutionErrorKind::MissingResult,
        format!("result declared type '{declared}' but the value is {actual}"),
    )
    .into()
}

/// A 1x1 numeric frame counts as a scalar; aggregate queries produce these.
fn scalar_from_frame(frame: &DataFrame) -> Option<f64> {
    if frame.height() != 1 || frame.width() != 1 {
        return None;
    }
    let series = frame.get_columns().first()?;
    if !series.dtype().is_numeric() {
        return None;
    }
    series.cast(&DataType::Float64).ok()?.f64().ok()?.get(0)
}

/// Row-oriented JSON rendering of a frame; large results are sampled.
pub fn dataframe_to_json(frame: &DataFrame) -> Result<serde_json::Value> {
    const MAX_ROWS: usize = 1000;
    const SAMPLE_ROWS: usize = 100;

    let sampled = if frame.height() > MAX_ROWS {
        frame.head(Some(SAMPLE_ROWS))
    } else {
        frame.clone()
    };

    let columns: Vec<String> = sampled
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows = Vec::with_capacity(sampled.height());

    for row_idx in 0..sampled.height() {
        let mut row = serde_json::Map::new();
        for name in &columns {
            let series = sampled.column(name)?;
            row.insert(name.clone(), series_value_to_json(series, row_idx)?);
        }
        rows.push(serde_json::Value::Object(row));
    }

    Ok(serde_json::json!({
        "columns": columns,
        "rows": rows,
        "total_rows": frame.height(),
    }))
}

fn series_value_to_json(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    let value = series.get(row_idx)?;
    if value.is_null() {
        return Ok(serde_json::Value::Null);
    }

    let json = match value {
        AnyValue::Boolean(b) => serde_json::Value::Bool(b),
        AnyValue::String(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(v) => serde_json::Value::Number(v.into()),
        AnyValue::Int16(v) => serde_json::Value::Number(v.into()),
        AnyValue::Int32(v) => serde_json::Value::Number(v.into()),
        AnyValue::Int64(v) => serde_json::Value::Number(v.into()),
        AnyValue::UInt8(v) => serde_json::Value::Number(v.into()),
        AnyValue::UInt16(v) => serde_json::Value::Number(v.into()),
        AnyValue::UInt32(v) => serde_json::Value::Number(v.into()),
        AnyValue::UInt64(v) => serde_json::Value::Number(v.into()),
        AnyValue::Float32(v) => serde_json::Number::from_f64(v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => serde_json::Value::String(other.to_string()),
    };
    Ok(json)
}

/// Short automated commentary on a result, shown alongside it.
pub fn generate_analysis(result: &TypedResult, question: &str) -> String {
    match result {
        TypedResult::Dataframe(frame) => {
            let mut lines = vec![format!(
                "The query returned {} records with {} columns.",
                frame.height(),
                frame.width()
            )];

            let with_nulls: Vec<String> = frame
                .get_columns()
                .iter()
                .filter(|s| s.null_count() > 0)
                .map(|s| format!("{} ({} nulls)", s.name(), s.null_count()))
                .collect();
            if !with_nulls.is_empty() {
                lines.push(format!("Columns with missing values: {}.", with_nulls.join(", ")));
            }

            for series in frame.get_columns().iter().filter(|s| s.dtype().is_numeric()).take(2) {
                if let (Ok(Some(min)), Ok(Some(max))) = (series.min::<f64>(), series.max::<f64>()) {
                    let mean = series.mean().unwrap_or(f64::NAN);
                    lines.push(format!(
                        "Stats for '{}': min={min:.2}, mean={mean:.2}, max={max:.2}.",
                        series.name()
                    ));
                }
            }
            lines.join("\n")
        }
        TypedResult::Chart(spec) => format!(
            "Visualization generated for \"{question}\": {:?} chart of {} by {} ({} categories).",
            spec.kind,
            spec.value_column,
            spec.category_column,
            spec.categories.len()
        ),
        TypedResult::Number(value) => format!("The numeric answer is {value}."),
        TypedResult::Text(text) => {
            let mut preview = text.chars().take(100).collect::<String>();
            if text.chars().count() > 100 {
                preview.push('…');
            }
            format!("Answer: {preview}")
        }
    }
}

/// Serializable wrapper for transport layers that want the tag inline.
#[derive(Debug, Serialize)]
pub struct ResultPayload {
    pub r#type: String,
    pub analysis: String,
    pub value: serde_json::Value,
}

impl ResultPayload {
    pub fn from_result(result: &TypedResult, question: &str) -> Result<Self> {
        Ok(Self {
            r#type: result.type_tag().to_string(),
            analysis: generate_analysis(result, question),
            value: result.to_json()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn envelope(declared: OutputKind, value: ScriptValue) -> ResultEnvelope {
        ResultEnvelope { declared, value }
    }

    #[test]
    fn dataframe_envelope_passes_through() {
        let frame = df!["a" => [1, 2]].unwrap();
        let result = classify_envelope(
            envelope(OutputKind::Dataframe, ScriptValue::Frame(frame)),
            "q",
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(result.type_tag(), "dataframe");
    }

    #[test]
    fn scalar_frame_coerces_to_number() {
        let frame = df!["total" => [42.0]].unwrap();
        let result = classify_envelope(
            envelope(OutputKind::Number, ScriptValue::Frame(frame)),
            "q",
            &EngineConfig::default(),
        )
        .unwrap();
        match result {
            TypedResult::Number(n) => assert_eq!(n, 42.0),
            other => panic!("expected number, got {}", other.type_tag()),
        }
    }

    #[test]
    fn declared_chart_over_frame_is_inferred() {
        let frame = df!["month" => ["Jan", "Feb"], "total" => [1.0, 2.0]].unwrap();
        let result = classify_envelope(
            envelope(OutputKind::Chart, ScriptValue::Frame(frame)),
            "totais por mês",
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(result.type_tag(), "chart");
    }

    #[test]
    fn chart_without_numeric_column_degrades_to_table() {
        let frame = df!["a" => ["x", "y"], "b" => ["u", "v"]].unwrap();
        let result = classify_envelope(
            envelope(OutputKind::Chart, ScriptValue::Frame(frame)),
            "q",
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(result.type_tag(), "dataframe");
    }

    #[test]
    fn mismatched_declaration_is_missing_result() {
        let err = classify_envelope(
            envelope(OutputKind::Number, ScriptValue::Text("oops".to_string())),
            "q",
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared type 'number'"));
    }

    #[test]
    fn dataframe_json_has_columns_and_rows() {
        let frame = df!["a" => [1i64, 2], "b" => ["x", "y"]].unwrap();
        let json = dataframe_to_json(&frame).unwrap();
        assert_eq!(json["columns"].as_array().unwrap().len(), 2);
        assert_eq!(json["rows"].as_array().unwrap().len(), 2);
        assert_eq!(json["rows"][0]["a"], 1);
        assert_eq!(json["rows"][1]["b"], "y");
    }
}

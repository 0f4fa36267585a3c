//! Sandboxed executor for generated code.
//!
//! Generated code runs as a small line-oriented script: one `name = expr`
//! statement per line. The scope exposes exactly the dataset snapshots, the
//! SQL adapter's `execute_sql_query`, and an allow-list of dataframe
//! primitives; nothing from the hosting process is reachable. On normal
//! completion the reserved binding `result` must hold
//! `{"type": <tag>, "value": <binding>}`; anything else is a classified
//! `ExecutionError`. Faults are caught and carried as text, never panics.

use crate::dataset::Dataset;
use crate::error::{EngineError, ExecutionError, ExecutionErrorKind, Result};
use crate::llm::OutputKind;
use crate::sql::SqlExecutor;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Value kinds a script can bind.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Frame(DataFrame),
    Number(f64),
    Text(String),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Frame(_) => "dataframe",
            ScriptValue::Number(_) => "number",
            ScriptValue::Text(_) => "string",
        }
    }
}

/// What the script designated as its answer.
#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    pub declared: OutputKind,
    pub value: ScriptValue,
}

/// Everything a script may touch.
pub struct SandboxScope<'a> {
    pub datasets: &'a [Arc<Dataset>],
    pub sql: &'a SqlExecutor,
}

pub struct ScriptExecutor {
    budget: Duration,
}

impl ScriptExecutor {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// Run one generated script to completion or failure. The wall-clock
    /// budget is checked between statements and passed down to SQL calls;
    /// cancellation is cooperative at attempt granularity.
    pub fn execute(&self, code: &str, scope: &SandboxScope<'_>) -> Result<ResultEnvelope> {
        let deadline = Instant::now() + self.budget;
        let mut bindings: HashMap<String, ScriptValue> = HashMap::new();
        let mut envelope: Option<ResultEnvelope> = None;

        let assignment = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$").expect("static regex");

        for (line_no, raw_line) in code.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("--") {
                continue;
            }

            if Instant::now() >= deadline {
                return Err(ExecutionError::timeout(self.budget.as_secs()).into());
            }

            let captures = assignment.captures(line).ok_or_else(|| {
                runtime_fault(format!("line {}: statement is not an assignment: {line}", line_no + 1))
            })?;
            let target = captures[1].to_string();
            let expr = captures[2].trim();

            if target == "result" {
                envelope = Some(self.parse_result_envelope(expr, &bindings)?);
                continue;
            }

            let value = self.eval_expr(expr, &bindings, scope, deadline)?;
            bindings.insert(target, value);
        }

        debug!(bindings = bindings.len(), "script completed");
        envelope.ok_or_else(|| {
            ExecutionError::new(
                ExecutionErrorKind::MissingResult,
                "script did not assign the reserved 'result' binding",
            )
            .into()
        })
    }

    fn parse_result_envelope(
        &self,
        expr: &str,
        bindings: &HashMap<String, ScriptValue>,
    ) -> Result<ResultEnvelope> {
        let pattern =
            Regex::new(r#"^\{\s*["']type["']\s*:\s*["']([a-z]+)["']\s*,\s*["']value["']\s*:\s*(.+?)\s*\}$"#)
                .expect("static regex");
        let captures = pattern.captures(expr).ok_or_else(|| {
            ExecutionError::new(
                ExecutionErrorKind::MissingResult,
                format!("result must be {{\"type\": ..., \"value\": ...}}, got: {expr}"),
            )
        })?;

        let declared: OutputKind = captures[1].parse().map_err(|_| {
            ExecutionError::new(
                ExecutionErrorKind::MissingResult,
                format!("unknown result type tag '{}'", &captures[1]),
            )
        })?;

        let value_expr = captures[2].trim();
        let value = self
            .literal_value(value_expr)
            .or_else(|| bindings.get(value_expr).cloned())
            .ok_or_else(|| {
                ExecutionError::new(
                    ExecutionErrorKind::MissingResult,
                    format!("result value '{value_expr}' is not bound"),
                )
            })?;

        Ok(ResultEnvelope { declared, value })
    }

    fn eval_expr(
        &self,
        expr: &str,
        bindings: &HashMap<String, ScriptValue>,
        scope: &SandboxScope<'_>,
        deadline: Instant,
    ) -> Result<ScriptValue> {
        // execute_sql_query("...")
        let sql_call =
            Regex::new(r#"^execute_sql_query\(\s*["'](.+)["']\s*\)$"#).expect("static regex");
        if let Some(captures) = sql_call.captures(expr) {
            let frame = scope.sql.run(&captures[1], Some(deadline))?;
            return Ok(ScriptValue::Frame(frame));
        }

        // datasets["id"]
        let dataset_ref =
            Regex::new(r#"^datasets\[\s*["']([A-Za-z0-9_]+)["']\s*\]$"#).expect("static regex");
        if let Some(captures) = dataset_ref.captures(expr) {
            let name = &captures[1];
            let dataset = scope
                .datasets
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| runtime_fault(format!("dataset '{name}' is not in scope")))?;
            return Ok(ScriptValue::Frame(dataset.frame().clone()));
        }

        // select(frame, ["a", "b"]) keeps its own shape because of the list.
        let select_call =
            Regex::new(r#"^select\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*\[(.*)\]\s*\)$"#)
                .expect("static regex");
        if let Some(captures) = select_call.captures(expr) {
            let frame = self.frame_binding(&captures[1], bindings)?;
            let columns: Vec<String> = captures[2]
                .split(',')
                .map(|c| c.trim().trim_matches('"').trim_matches('\'').to_string())
                .filter(|c| !c.is_empty())
                .collect();
            let selected = frame
                .select(columns)
                .map_err(|e| runtime_fault(e.to_string()))?;
            return Ok(ScriptValue::Frame(selected));
        }

        // Remaining allow-listed primitives: func(arg, ...)
        let call = Regex::new(r"^([a-z_]+)\(\s*(.*?)\s*\)$").expect("static regex");
        if let Some(captures) = call.captures(expr) {
            let func = captures[1].to_string();
            let args: Vec<&str> = if captures[2].is_empty() {
                Vec::new()
            } else {
                captures[2].split(',').map(|a| a.trim()).collect()
            };
            return self.eval_call(&func, &args, bindings);
        }

        if let Some(value) = self.literal_value(expr) {
            return Ok(value);
        }

        if let Some(value) = bindings.get(expr) {
            return Ok(value.clone());
        }

        Err(runtime_fault(format!("unsupported expression: {expr}")))
    }

    fn eval_call(
        &self,
        func: &str,
        args: &[&str],
        bindings: &HashMap<String, ScriptValue>,
    ) -> Result<ScriptValue> {
        match func {
            "head" | "tail" => {
                let frame = self.frame_arg(func, args, 0, bindings)?;
                let n = self.number_arg(func, args, 1)? as usize;
                let taken = if func == "head" {
                    frame.head(Some(n))
                } else {
                    frame.tail(Some(n))
                };
                Ok(ScriptValue::Frame(taken))
            }
            "sort" => {
                let frame = self.frame_arg(func, args, 0, bindings)?;
                let column = self.text_arg(func, args, 1)?;
                let descending = args
                    .get(2)
                    .map(|a| matches!(*a, "desc" | "true" | "True"))
                    .unwrap_or(false);
                let sorted = frame
                    .sort(
                        [column.as_str()],
                        SortMultipleOptions::default().with_order_descending(descending),
                    )
                    .map_err(|e| runtime_fault(e.to_string()))?;
                Ok(ScriptValue::Frame(sorted))
            }
            "count" => {
                let frame = self.frame_arg(func, args, 0, bindings)?;
                Ok(ScriptValue::Number(frame.height() as f64))
            }
            "sum_of" => {
                let frame = self.frame_arg(func, args, 0, bindings)?;
                let column = self.text_arg(func, args, 1)?;
                let series = frame
                    .column(&column)
                    .map_err(|e| runtime_fault(e.to_string()))?;
                let sum = series
                    .sum::<f64>()
                    .map_err(|_| runtime_fault(format!("cannot sum column '{column}'")))?;
                Ok(ScriptValue::Number(sum))
            }
            "mean_of" => {
                let frame = self.frame_arg(func, args, 0, bindings)?;
                let column = self.text_arg(func, args, 1)?;
                let series = frame
                    .column(&column)
                    .map_err(|e| runtime_fault(e.to_string()))?;
                let mean = series
                    .mean()
                    .ok_or_else(|| runtime_fault(format!("cannot average column '{column}'")))?;
                Ok(ScriptValue::Number(mean))
            }
            "round_to" => {
                let value = match args.first().and_then(|a| bindings.get(*a)) {
                    Some(ScriptValue::Number(n)) => *n,
                    _ => self.number_arg(func, args, 0)?,
                };
                let digits = self.number_arg(func, args, 1)? as i32;
                let factor = 10f64.powi(digits);
                Ok(ScriptValue::Number((value * factor).round() / factor))
            }
            other => Err(runtime_fault(format!(
                "function '{other}' is not available in the sandbox"
            ))),
        }
    }

    fn literal_value(&self, expr: &str) -> Option<ScriptValue> {
        if let Ok(number) = expr.parse::<f64>() {
            return Some(ScriptValue::Number(number));
        }
        let quoted = (expr.starts_with('"') && expr.ends_with('"') && expr.len() >= 2)
            || (expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2);
        if quoted {
            return Some(ScriptValue::Text(expr[1..expr.len() - 1].to_string()));
        }
        None
    }

    fn frame_binding(
        &self,
        name: &str,
        bindings: &HashMap<String, ScriptValue>,
    ) -> Result<DataFrame> {
        match bindings.get(name) {
            Some(ScriptValue::Frame(frame)) => Ok(frame.clone()),
            Some(other) => Err(runtime_fault(format!(
                "'{name}' is a {}, expected a dataframe",
                other.type_name()
            ))),
            None => Err(runtime_fault(format!("'{name}' is not bound"))),
        }
    }

    fn frame_arg(
        &self,
        func: &str,
        args: &[&str],
        index: usize,
        bindings: &HashMap<String, ScriptValue>,
    ) -> Result<DataFrame> {
        let name = args
            .get(index)
            .ok_or_else(|| runtime_fault(format!("{func} is missing argument {index}")))?;
        self.frame_binding(name, bindings)
    }

    fn number_arg(&self, func: &str, args: &[&str], index: usize) -> Result<f64> {
        args.get(index)
            .and_then(|a| a.parse::<f64>().ok())
            .ok_or_else(|| {
                runtime_fault(format!("{func} expects a numeric literal at argument {index}"))
            })
    }

    fn text_arg(&self, func: &str, args: &[&str], index: usize) -> Result<String> {
        let raw = args
            .get(index)
            .ok_or_else(|| runtime_fault(format!("{func} is missing argument {index}")))?;
        Ok(raw.trim_matches('"').trim_matches('\'').to_string())
    }
}

fn runtime_fault(message: impl Into<String>) -> EngineError {
    ExecutionError::new(ExecutionErrorKind::RuntimeFault, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn sales_scope() -> (Vec<Arc<Dataset>>, SqlExecutor) {
        let frame = df![
            "month" => ["Jan", "Feb", "Mar"],
            "total" => [10.0, 20.0, 30.0]
        ]
        .unwrap();
        let datasets = vec![Arc::new(Dataset::new("sales", "", frame, None).unwrap())];
        let sql = SqlExecutor::new(datasets.clone());
        (datasets, sql)
    }

    fn run(code: &str) -> Result<ResultEnvelope> {
        let (datasets, sql) = sales_scope();
        let scope = SandboxScope {
            datasets: &datasets,
            sql: &sql,
        };
        ScriptExecutor::new(Duration::from_secs(5)).execute(code, &scope)
    }

    #[test]
    fn sql_to_dataframe_result() {
        let envelope = run(
            "df = execute_sql_query(\"SELECT month, total FROM sales\")\n\
             result = {\"type\": \"dataframe\", \"value\": df}",
        )
        .unwrap();
        assert_eq!(envelope.declared, OutputKind::Dataframe);
        match envelope.value {
            ScriptValue::Frame(frame) => assert_eq!(frame.height(), 3),
            other => panic!("expected frame, got {}", other.type_name()),
        }
    }

    #[test]
    fn primitives_compose() {
        let envelope = run(
            "df = datasets[\"sales\"]\n\
             top = sort(df, \"total\", desc)\n\
             top = head(top, 1)\n\
             n = sum_of(top, \"total\")\n\
             result = {\"type\": \"number\", \"value\": n}",
        )
        .unwrap();
        match envelope.value {
            ScriptValue::Number(n) => assert_eq!(n, 30.0),
            other => panic!("expected number, got {}", other.type_name()),
        }
    }

    #[test]
    fn missing_result_binding_is_classified() {
        let err = run("df = datasets[\"sales\"]").unwrap_err();
        match err {
            EngineError::Execution(e) => assert_eq!(e.kind, ExecutionErrorKind::MissingResult),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_function_is_a_runtime_fault() {
        let err = run(
            "df = open_file(\"/etc/passwd\")\n\
             result = {\"type\": \"string\", \"value\": df}",
        )
        .unwrap_err();
        match err {
            EngineError::Execution(e) => {
                assert_eq!(e.kind, ExecutionErrorKind::RuntimeFault);
                assert!(e.message.contains("open_file"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sql_failures_keep_their_query_error_identity() {
        let err = run(
            "df = execute_sql_query(\"SELECT regiao FROM sales\")\n\
             result = {\"type\": \"dataframe\", \"value\": df}",
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Query(_)));
    }

    #[test]
    fn expired_budget_reports_timeout() {
        let (datasets, sql) = sales_scope();
        let scope = SandboxScope {
            datasets: &datasets,
            sql: &sql,
        };
        let err = ScriptExecutor::new(Duration::from_secs(0))
            .execute("df = datasets[\"sales\"]", &scope)
            .unwrap_err();
        match err {
            EngineError::Execution(e) => assert_eq!(e.kind, ExecutionErrorKind::Timeout),
            other => panic!("unexpected error: {other}"),
        }
    }
}

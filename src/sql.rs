//! SQL Execution Adapter.
//!
//! Executes generated SQL against registered dataset snapshots through the
//! polars SQL engine. Before execution the query is rewritten into the
//! target dialect: incompatible constructs are normalized and a fixed set
//! of helper functions is expanded, so generated code does not need to know
//! which engine backs the datasets. The engine reports failures as plain
//! text, so errors are classified by a pattern table.

use crate::dataset::Dataset;
use crate::error::{QueryError, QueryErrorKind};
use polars::prelude::*;
use polars::sql::SQLContext;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct SqlExecutor {
    datasets: Vec<Arc<Dataset>>,
}

impl SqlExecutor {
    /// Build an executor over a fixed snapshot of datasets. One resolution
    /// holds one snapshot; re-registration elsewhere does not affect it.
    pub fn new(datasets: Vec<Arc<Dataset>>) -> Self {
        Self { datasets }
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.datasets.iter().map(|d| d.name.as_str()).collect()
    }

    /// Execute one SQL fragment. `deadline` is the enclosing attempt's
    /// wall-clock budget; an expired deadline reports as a query timeout.
    pub fn run(
        &self,
        query: &str,
        deadline: Option<Instant>,
    ) -> std::result::Result<DataFrame, QueryError> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::new(
                    QueryErrorKind::Timeout,
                    "attempt budget exhausted before SQL execution",
                ));
            }
        }

        self.check_table_references(query)?;
        let adapted = normalize_query(query);
        if adapted != query {
            debug!(original = query, adapted = adapted.as_str(), "normalized SQL dialect");
        }

        let mut context = SQLContext::new();
        for dataset in &self.datasets {
            context.register(&dataset.name, dataset.frame().clone().lazy());
        }

        let frame = context
            .execute(&adapted)
            .and_then(|lf| lf.collect())
            .map_err(|e| classify_engine_error(&e.to_string()))?;

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::new(
                    QueryErrorKind::Timeout,
                    "SQL execution exceeded the attempt budget",
                ));
            }
        }

        Ok(frame)
    }

    /// Reject references to tables that are not registered, before the
    /// engine gets a chance to produce a less helpful message.
    fn check_table_references(&self, query: &str) -> std::result::Result<(), QueryError> {
        let names = self.dataset_names();
        for table in referenced_tables(query) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&table)) {
                return Err(QueryError::new(
                    QueryErrorKind::UnknownTable,
                    format!(
                        "table '{}' not found; registered datasets: {}",
                        table,
                        names.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Table names referenced in FROM/JOIN clauses.
pub fn referenced_tables(query: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    pattern
        .captures_iter(query)
        .map(|c| c[1].to_string())
        .collect()
}

/// Rewrite constructs the engine does not support into its dialect, and
/// expand the helper functions available to generated queries.
pub fn normalize_query(query: &str) -> String {
    let mut sql = query.trim().trim_end_matches(';').to_string();

    // Date formatting variants.
    sql = Regex::new(r"(?i)\bDATE_FORMAT\s*\(")
        .expect("static regex")
        .replace_all(&sql, "STRFTIME(")
        .to_string();
    sql = Regex::new(r"(?i)\bTO_DATE\s*\(\s*([^()]+?)\s*\)")
        .expect("static regex")
        .replace_all(&sql, "CAST($1 AS DATE)")
        .to_string();

    // String functions.
    sql = Regex::new(r"(?i)\bSUBSTRING\s*\(")
        .expect("static regex")
        .replace_all(&sql, "SUBSTR(")
        .to_string();

    // LIMIT/OFFSET variants.
    sql = Regex::new(r"(?i)\bFETCH\s+FIRST\s+(\d+)\s+ROWS?\s+ONLY")
        .expect("static regex")
        .replace_all(&sql, "LIMIT $1")
        .to_string();
    sql = Regex::new(r"(?i)\bLIMIT\s+(\d+)\s*,\s*(\d+)")
        .expect("static regex")
        .replace_all(&sql, "LIMIT $2 OFFSET $1")
        .to_string();
    let top = Regex::new(r"(?i)^SELECT\s+TOP\s+(\d+)\s+").expect("static regex");
    let top_limit = top.captures(&sql).map(|c| c[1].to_string());
    if let Some(n) = top_limit {
        sql = top.replace(&sql, "SELECT ").to_string();
        if !Regex::new(r"(?i)\bLIMIT\b").expect("static regex").is_match(&sql) {
            sql.push_str(&format!(" LIMIT {n}"));
        }
    }

    // Helper functions available to generated queries.
    sql = Regex::new(r"(?i)\bSAFE_DIVIDE\s*\(\s*([^,()]+)\s*,\s*([^()]+?)\s*\)")
        .expect("static regex")
        .replace_all(&sql, "(CASE WHEN ($2) = 0 THEN NULL ELSE ($1) / ($2) END)")
        .to_string();
    sql = Regex::new(r"(?i)\bPERCENTILE\s*\(")
        .expect("static regex")
        .replace_all(&sql, "QUANTILE_CONT(")
        .to_string();
    sql = Regex::new(r"(?i)\bDATE_BUCKET\s*\(\s*([^,()]+)\s*,\s*'(year|month|day)'\s*\)")
        .expect("static regex")
        .replace_all(&sql, |caps: &regex::Captures| {
            let format = match caps[2].to_lowercase().as_str() {
                "year" => "%Y",
                "month" => "%Y-%m",
                _ => "%Y-%m-%d",
            };
            format!("STRFTIME({}, '{}')", &caps[1], format)
        })
        .to_string();

    sql
}

/// Map raw engine error text to the closed failure taxonomy.
pub fn classify_engine_error(message: &str) -> QueryError {
    let lowered = message.to_lowercase();

    let missing = lowered.contains("not found")
        || lowered.contains("does not exist")
        || lowered.contains("unable to find")
        || lowered.contains("not known");

    let kind = if (lowered.contains("table") || lowered.contains("relation"))
        && (missing || lowered.contains("unregistered"))
    {
        QueryErrorKind::UnknownTable
    } else if missing {
        // The engine reports missing columns in several shapes ("not
        // found: x", "field not found", ...); anything missing that is not
        // a table reference is treated as a column.
        QueryErrorKind::UnknownColumn
    } else if lowered.contains("cannot cast")
        || lowered.contains("invalid dtype")
        || lowered.contains("type mismatch")
        || lowered.contains("cannot compare")
        || lowered.contains("conversion from")
    {
        QueryErrorKind::TypeMismatch
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        QueryErrorKind::Timeout
    } else {
        // The engine reports parse failures and everything else it cannot
        // attribute as free text; treat those as syntax-level failures.
        QueryErrorKind::SyntaxError
    };

    QueryError::new(kind, message.to_string())
}

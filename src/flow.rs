//! Alternative Flow Controller.
//!
//! Drives one query resolution as a state machine:
//! `PreCheck → Generating → Executing → {Success, Reformulating, Exhausted}`.
//! Before any generation call, entity-looking tokens are checked against the
//! known dataset/column names. Classified failures become hints for the next
//! generation call; after the attempt ceiling the controller answers with
//! suggestions instead of an error. No raw error ever crosses this boundary.

use crate::codegen::QueryToCodeAdapter;
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{EngineError, ExecutionErrorKind, QueryErrorKind, Result};
use crate::feedback::FeedbackManager;
use crate::memory::ConversationMemory;
use crate::response::{classify_envelope, TypedResult};
use crate::sandbox::{SandboxScope, ScriptExecutor};
use crate::sql::SqlExecutor;
use itertools::Itertools;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use strsim::jaro_winkler;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    PreCheck,
    Generating,
    Executing,
    Success,
    Reformulating,
    Exhausted,
}

/// How one attempt failed, after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    MissingEntity,
    TypeMismatch,
    Timeout,
    Syntax,
    Generation,
    Other,
}

pub struct ResolutionOutcome {
    pub result: TypedResult,
    pub state: ResolutionState,
    /// Index of the attempt that produced the result (0 = original).
    pub attempts: u8,
    /// Code behind a successful result, for memory and the feedback store.
    pub code: Option<String>,
    pub elapsed: std::time::Duration,
}

pub struct QueryResolver<'a> {
    adapter: &'a QueryToCodeAdapter,
    config: &'a EngineConfig,
    datasets: &'a [Arc<Dataset>],
    sql: &'a SqlExecutor,
    executor: &'a ScriptExecutor,
}

impl<'a> QueryResolver<'a> {
    pub fn new(
        adapter: &'a QueryToCodeAdapter,
        config: &'a EngineConfig,
        datasets: &'a [Arc<Dataset>],
        sql: &'a SqlExecutor,
        executor: &'a ScriptExecutor,
    ) -> Self {
        Self {
            adapter,
            config,
            datasets,
            sql,
            executor,
        }
    }

    /// Resolve one question. `feedback_hint` is the user-comment-derived
    /// refinement, kept additive to failure hints (failure hint first).
    pub async fn resolve(
        &self,
        question: &str,
        memory: &ConversationMemory,
        feedback: &FeedbackManager,
        feedback_hint: Option<&str>,
    ) -> Result<ResolutionOutcome> {
        let start = Instant::now();

        if let Some(result) = self.precheck(question) {
            info!("pre-check short-circuited without calling the generator");
            return Ok(ResolutionOutcome {
                result,
                state: ResolutionState::PreCheck,
                attempts: 0,
                code: None,
                elapsed: start.elapsed(),
            });
        }

        let mut failure_hints: Vec<String> = Vec::new();
        let mut last_failure_text = String::new();
        let mut last_failure_class: Option<FailureClass> = None;

        for attempt in 0..=self.config.max_reformulations {
            if attempt > 0 {
                info!(attempt, "reformulating after classified failure");
            }

            let hint = compose_hint(&failure_hints, feedback_hint);
            let candidate = match self
                .adapter
                .generate(question, self.datasets, memory, feedback, hint.as_deref())
                .await
            {
                Ok(candidate) => candidate,
                Err(e) => {
                    // Backend failures are always retryable; a timeout
                    // consumes the attempt like any other failure.
                    warn!(attempt, error = %e, "generation failed");
                    last_failure_text = e.to_string();
                    last_failure_class = Some(FailureClass::Generation);
                    continue;
                }
            };

            let scope = SandboxScope {
                datasets: self.datasets,
                sql: self.sql,
            };
            let execution = self
                .executor
                .execute(&candidate.code, &scope)
                .and_then(|envelope| classify_envelope(envelope, question, self.config));

            match execution {
                Ok(result) => {
                    info!(attempt, kind = result.type_tag(), "resolution succeeded");
                    return Ok(ResolutionOutcome {
                        result,
                        state: ResolutionState::Success,
                        attempts: attempt,
                        code: Some(candidate.code),
                        elapsed: start.elapsed(),
                    });
                }
                Err(failure) => {
                    let (class, hint) = self.classify_failure(&failure);
                    warn!(attempt, class = ?class, error = %failure, "attempt failed");

                    // A syntax-level failure that survives one reformulation
                    // will not improve with more of the same.
                    if class == FailureClass::Syntax
                        && last_failure_class == Some(FailureClass::Syntax)
                    {
                        last_failure_text = failure.to_string();
                        break;
                    }

                    if let Some(hint) = hint {
                        if !failure_hints.contains(&hint) {
                            failure_hints.push(hint);
                        }
                    }
                    last_failure_text = failure.to_string();
                    last_failure_class = Some(class);
                }
            }
        }

        Ok(ResolutionOutcome {
            result: self.exhausted_response(question, &last_failure_text),
            state: ResolutionState::Exhausted,
            attempts: self.config.max_reformulations,
            code: None,
            elapsed: start.elapsed(),
        })
    }

    /// Scan entity-looking tokens against known dataset/column names. A
    /// candidate that matches nothing within the fuzzy threshold answers
    /// immediately, before any generation call.
    fn precheck(&self, question: &str) -> Option<TypedResult> {
        let known = self.known_entity_names();
        if known.is_empty() {
            return None;
        }

        for candidate in entity_candidates(question) {
            let normalized = normalize_token(&candidate);
            if normalized.len() < 2 {
                continue;
            }
            let (best_name, best_score) = closest_match(&normalized, &known)?;
            if best_score >= self.config.fuzzy_threshold {
                continue;
            }

            let datasets = self
                .datasets
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let mut message = format!(
                "No data about '{candidate}' is available. Registered datasets: {datasets}. \
                 Closest known name: '{best_name}'."
            );
            let suggestions = generate_suggestions(self.datasets, 3);
            if !suggestions.is_empty() {
                message.push_str("\n\nYou could try:\n");
                for (i, suggestion) in suggestions.iter().enumerate() {
                    message.push_str(&format!("{}. {}\n", i + 1, suggestion));
                }
            }
            message.push_str("\nPlease rephrase the question using the available data.");
            return Some(TypedResult::Text(message));
        }

        None
    }

    fn known_entity_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for dataset in self.datasets {
            names.push(dataset.name.clone());
            names.extend(dataset.column_names());
            if let Some(schema) = &dataset.semantic {
                names.extend(schema.aliases().into_iter().map(|a| a.to_string()));
            }
        }
        names
    }

    /// Map a failure to its class and, where recovery is plausible, a hint
    /// for the next generation call.
    fn classify_failure(&self, failure: &EngineError) -> (FailureClass, Option<String>) {
        match failure {
            EngineError::Query(query) => match query.kind {
                QueryErrorKind::UnknownColumn => {
                    (FailureClass::MissingEntity, self.column_hint(&query.message))
                }
                QueryErrorKind::UnknownTable => {
                    (FailureClass::MissingEntity, self.table_hint(&query.message))
                }
                QueryErrorKind::TypeMismatch => (
                    FailureClass::TypeMismatch,
                    Some(format!(
                        "the query mixed incompatible types ({}); cast explicitly or use numeric columns",
                        query.message
                    )),
                ),
                QueryErrorKind::Timeout => (FailureClass::Timeout, None),
                QueryErrorKind::SyntaxError => (
                    FailureClass::Syntax,
                    Some(format!("the SQL did not parse: {}", query.message)),
                ),
            },
            EngineError::Execution(execution) => match execution.kind {
                ExecutionErrorKind::Timeout => (FailureClass::Timeout, None),
                ExecutionErrorKind::MissingResult => (
                    FailureClass::Other,
                    Some(
                        "the script must end with result = {\"type\": ..., \"value\": <name>}"
                            .to_string(),
                    ),
                ),
                ExecutionErrorKind::RuntimeFault => {
                    // Raw fault text is preserved exactly for this match.
                    let message = execution.message.to_lowercase();
                    if message.contains("column") || message.contains("not found") {
                        (FailureClass::MissingEntity, self.column_hint(&execution.message))
                    } else {
                        (
                            FailureClass::Other,
                            Some(format!("the previous script failed: {}", execution.message)),
                        )
                    }
                }
            },
            EngineError::Generation(_) => (FailureClass::Generation, None),
            other => (
                FailureClass::Other,
                Some(format!("the previous attempt failed: {other}")),
            ),
        }
    }

    fn column_hint(&self, message: &str) -> Option<String> {
        let name = first_quoted(message)?;
        let columns: Vec<String> = self
            .datasets
            .iter()
            .flat_map(|d| d.column_names())
            .collect();
        match closest_match(&normalize_token(&name), &columns) {
            Some((closest, _)) => Some(format!(
                "column '{name}' not found; closest match '{closest}'"
            )),
            None => Some(format!("column '{name}' not found")),
        }
    }

    fn table_hint(&self, message: &str) -> Option<String> {
        let name = first_quoted(message)?;
        let datasets: Vec<String> = self.datasets.iter().map(|d| d.name.clone()).collect();
        let closest = closest_match(&normalize_token(&name), &datasets)
            .map(|(n, _)| format!("; closest match '{n}'"))
            .unwrap_or_default();
        Some(format!(
            "table '{}' does not exist; registered datasets are: {}{}",
            name,
            datasets.join(", "),
            closest
        ))
    }

    /// Terminal answer when the attempt ceiling is reached: explanation plus
    /// suggested questions built from column profiles, no generator call.
    fn exhausted_response(&self, question: &str, last_failure: &str) -> TypedResult {
        let mut message = format!("Could not answer: \"{question}\"\n");
        if !last_failure.is_empty() {
            message.push_str(&format!("\nLast error: {last_failure}\n"));
        }
        message.push_str("\nHere are some questions that will work with the loaded data:\n\n");
        for (i, suggestion) in generate_suggestions(self.datasets, 5).iter().enumerate() {
            message.push_str(&format!("{}. {}\n", i + 1, suggestion));
        }
        message.push_str(
            "\nYou can also simplify the question, name the dataset explicitly, \
             or send feedback to improve future answers.",
        );
        TypedResult::Text(message)
    }
}

fn compose_hint(failure_hints: &[String], feedback_hint: Option<&str>) -> Option<String> {
    let mut parts: Vec<&str> = failure_hints.iter().map(|h| h.as_str()).collect();
    if let Some(feedback) = feedback_hint {
        parts.push(feedback);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Tokens that look like entity references: quoted literals, capitalized
/// non-initial words, and the word after an explicit dataset cue.
fn entity_candidates(question: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    let quoted = Regex::new(r#"["']([^"']+)["']"#).expect("static regex");
    for capture in quoted.captures_iter(question) {
        candidates.push(capture[1].to_string());
    }

    let tokens: Vec<&str> = question.split_whitespace().collect();
    for (idx, token) in tokens.iter().enumerate() {
        let cleaned = token.trim_matches(|c: char| !c.is_alphanumeric());
        if cleaned.is_empty() {
            continue;
        }
        if idx > 0 && cleaned.chars().next().is_some_and(|c| c.is_uppercase()) {
            candidates.push(cleaned.to_string());
        }
        let lowered = cleaned.to_lowercase();
        if matches!(lowered.as_str(), "dataset" | "table" | "tabela") {
            if let Some(next) = tokens.get(idx + 1) {
                let next = next.trim_matches(|c: char| !c.is_alphanumeric());
                if !next.is_empty() {
                    candidates.push(next.to_string());
                }
            }
        }
    }

    candidates.into_iter().unique().collect()
}

fn normalize_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Best Jaro-Winkler match over `names`, even when below threshold; the
/// caller decides what the score means.
fn closest_match(target: &str, names: &[String]) -> Option<(String, f64)> {
    names
        .iter()
        .map(|name| (name.clone(), jaro_winkler(target, &normalize_token(name))))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Pull the offending entity name out of an engine error message. Engines
/// report it bare after "not found:", quoted, or double-quoted; the bare
/// form is tried first because some engines append a quoted suggestion of
/// their own after the offending name.
fn first_quoted(message: &str) -> Option<String> {
    for pattern in [
        r"not found:\s*([A-Za-z_][A-Za-z0-9_]*)",
        r"'([^']+)'",
        r#""([^"]+)""#,
        r"([A-Za-z_][A-Za-z0-9_]*)\s+not found",
    ] {
        if let Some(captures) = Regex::new(pattern).expect("static regex").captures(message) {
            return Some(captures[1].to_string());
        }
    }
    None
}

/// Suggested questions built by pairing aggregate verbs with profiled
/// columns. Requires no generator call.
pub fn generate_suggestions(datasets: &[Arc<Dataset>], limit: usize) -> Vec<String> {
    let mut suggestions = Vec::new();

    for dataset in datasets {
        let name = &dataset.name;
        suggestions.push(format!("Show a summary of dataset {name}"));
        suggestions.push(format!("How many records does {name} have?"));

        let numeric = dataset.numeric_columns();
        let categorical = dataset.categorical_columns(20);
        let dates = dataset.date_columns();

        if let (Some(num), Some(cat)) = (numeric.first(), categorical.first()) {
            suggestions.push(format!(
                "What is the total {} per {} in {name}?",
                num.name, cat.name
            ));
            suggestions.push(format!(
                "What is the average {} per {} in {name}?",
                num.name, cat.name
            ));
            suggestions.push(format!(
                "Show the top 5 {} by {} in {name}",
                cat.name, num.name
            ));
        }
        if let Some(num) = numeric.first() {
            suggestions.push(format!("What are the largest values of {} in {name}?", num.name));
        }
        if let (Some(num), Some(date)) = (numeric.first(), dates.first()) {
            suggestions.push(format!(
                "How does {} change over {} in {name}?",
                num.name, date.name
            ));
        }
    }

    suggestions.into_iter().unique().take(limit.max(1).min(10)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_candidates_pick_quoted_capitalized_and_cued_tokens() {
        let candidates = entity_candidates("Liste os dados da tabela clientes e de 'pedidos'");
        assert!(candidates.contains(&"clientes".to_string()));
        assert!(candidates.contains(&"pedidos".to_string()));

        let candidates = entity_candidates("mostre os Clientes ativos");
        assert!(candidates.contains(&"Clientes".to_string()));

        // Ordinary lowercase words are not entity references.
        let candidates = entity_candidates("total de vendas por mês");
        assert!(candidates.is_empty());
    }

    #[test]
    fn sentence_initial_word_is_not_a_candidate() {
        let candidates = entity_candidates("Mostre os dados");
        assert!(!candidates.contains(&"Mostre".to_string()));
    }

    #[test]
    fn closest_match_returns_best_even_below_threshold() {
        let names = vec!["vendas".to_string(), "compras".to_string()];
        let (best, score) = closest_match("clientes", &names).unwrap();
        assert_eq!(best, "vendas");
        assert!(score < 0.82);
    }

    #[test]
    fn hints_compose_failure_first() {
        let hints = vec!["column 'x' not found".to_string()];
        let composed = compose_hint(&hints, Some("show as a bar chart")).unwrap();
        let failure_pos = composed.find("column").unwrap();
        let feedback_pos = composed.find("bar chart").unwrap();
        assert!(failure_pos < feedback_pos);
    }
}

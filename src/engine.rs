//! Analysis engine facade.
//!
//! Owns the registry, the generative backend, the SQL adapter, the sandbox,
//! and the per-session memory/feedback state, and exposes the caller
//! boundary: `resolve_query`, `resolve_query_with_feedback`,
//! `request_visualization`, and `execute_direct_sql`. One engine serves one
//! session; concurrent sessions get their own engines from the
//! `SessionManager`.

use crate::chart::{build_chart, ChartKind, ChartRequest};
use crate::codegen::QueryToCodeAdapter;
use crate::config::EngineConfig;
use crate::connector::SourceDescriptor;
use crate::error::{EngineError, Result};
use crate::feedback::FeedbackManager;
use crate::flow::{QueryResolver, ResolutionState};
use crate::llm::{CodeGenerator, MockGenerator, OpenAiGenerator};
use crate::memory::ConversationMemory;
use crate::registry::DatasetRegistry;
use crate::response::{generate_analysis, TypedResult};
use crate::sandbox::ScriptExecutor;
use crate::schema::SemanticSchema;
use crate::sql::SqlExecutor;
use polars::prelude::DataFrame;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct AnalysisEngine {
    config: EngineConfig,
    registry: DatasetRegistry,
    adapter: QueryToCodeAdapter,
    executor: ScriptExecutor,
    memory: Mutex<ConversationMemory>,
    feedback: Mutex<FeedbackManager>,
    last_frame: Mutex<Option<DataFrame>>,
    last_question: Mutex<Option<String>>,
}

impl AnalysisEngine {
    /// Engine with the backend chosen from the config: the placeholder API
    /// key selects the deterministic mock, anything else the HTTP backend.
    pub fn new(config: EngineConfig) -> Self {
        let backend: Arc<dyn CodeGenerator> = if config.api_key == "dummy-api-key" {
            Arc::new(MockGenerator::new())
        } else {
            Arc::new(OpenAiGenerator::new(
                config.api_key.clone(),
                config.base_url.clone(),
                config.model.clone(),
            ))
        };
        Self::with_backend(config, backend)
    }

    /// Engine with an injected backend. Tests and embedders use this.
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn CodeGenerator>) -> Self {
        let adapter = QueryToCodeAdapter::new(backend, config.clone());
        let executor = ScriptExecutor::new(config.execution_timeout);
        Self {
            config,
            registry: DatasetRegistry::new(),
            adapter,
            executor,
            memory: Mutex::new(ConversationMemory::new()),
            feedback: Mutex::new(FeedbackManager::new()),
            last_frame: Mutex::new(None),
            last_question: Mutex::new(None),
        }
    }

    /// Attach a JSON-file-backed feedback store (per-session directory).
    pub fn with_feedback_storage(self, dir: impl AsRef<std::path::Path>) -> Self {
        *self.feedback.lock().expect("feedback lock poisoned") =
            FeedbackManager::with_storage(dir);
        self
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn load_data(
        &self,
        id: &str,
        source: SourceDescriptor,
        description: &str,
        semantic: Option<SemanticSchema>,
    ) -> Result<()> {
        self.registry.register(id, source, description, semantic)?;
        Ok(())
    }

    pub fn describe(&self, id: &str) -> Result<SemanticSchema> {
        self.registry.describe(id)
    }

    /// Resolve a natural-language question against the named datasets (all
    /// registered datasets when `dataset_ids` is empty).
    pub async fn resolve_query(
        &self,
        dataset_ids: &[&str],
        question: &str,
    ) -> Result<TypedResult> {
        self.resolve_internal(dataset_ids, question, None).await
    }

    /// Resolve with a user comment folded in as a refinement hint. The
    /// comment is also recorded in the feedback history.
    pub async fn resolve_query_with_feedback(
        &self,
        question: &str,
        comment: Option<&str>,
    ) -> Result<TypedResult> {
        let hint = comment.map(|c| {
            let feedback = self.feedback.lock().expect("feedback lock poisoned");
            feedback.suggest_refinement(question, c)
        });
        if let Some(comment) = comment {
            self.feedback
                .lock()
                .expect("feedback lock poisoned")
                .record_feedback(question, "", false, Some(comment));
        }
        self.resolve_internal(&[], question, hint.as_deref()).await
    }

    async fn resolve_internal(
        &self,
        dataset_ids: &[&str],
        question: &str,
        feedback_hint: Option<&str>,
    ) -> Result<TypedResult> {
        if self.registry.is_empty() {
            return Err(EngineError::Configuration(
                "no datasets registered; load data before querying".to_string(),
            ));
        }

        let question = sanitize_question(question);
        let query_id = uuid::Uuid::new_v4();
        info!(%query_id, question = question.as_str(), "resolving query");

        // One snapshot per resolution; re-registration elsewhere cannot
        // affect attempts in flight.
        let datasets = self.registry.snapshot(dataset_ids)?;
        let sql = SqlExecutor::new(datasets.clone());

        // Clone-out of memory and feedback so no lock is held across await
        // points; the resolver only reads them.
        let memory = self.memory.lock().expect("memory lock poisoned").clone();
        let feedback = self.feedback.lock().expect("feedback lock poisoned").clone();

        let outcome = {
            let resolver = QueryResolver::new(
                &self.adapter,
                &self.config,
                &datasets,
                &sql,
                &self.executor,
            );
            resolver
                .resolve(&question, &memory, &feedback, feedback_hint)
                .await?
        };

        info!(
            %query_id,
            state = ?outcome.state,
            attempts = outcome.attempts,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "resolution finished"
        );

        if outcome.state == ResolutionState::Success {
            let summary = outcome.result.summary();
            if let Some(code) = &outcome.code {
                self.memory
                    .lock()
                    .expect("memory lock poisoned")
                    .push(&question, code, &summary, false);
                self.feedback
                    .lock()
                    .expect("feedback lock poisoned")
                    .record_success(&question, code);
            }
            if let TypedResult::Dataframe(frame) = &outcome.result {
                *self.last_frame.lock().expect("last frame lock poisoned") = Some(frame.clone());
            }
            *self.last_question.lock().expect("last question lock poisoned") =
                Some(question.clone());
        }

        Ok(outcome.result)
    }

    /// Record user acceptance or rejection of a result. Accepted entries
    /// become trusted few-shot examples.
    pub fn record_feedback(
        &self,
        question: &str,
        result: &TypedResult,
        accepted: bool,
        comment: Option<&str>,
    ) {
        let summary = result.summary();
        self.feedback
            .lock()
            .expect("feedback lock poisoned")
            .record_feedback(question, &summary, accepted, comment);

        if accepted {
            let mut memory = self.memory.lock().expect("memory lock poisoned");
            if !memory.mark_accepted(question) {
                memory.push(question, "", &summary, true);
            }
        }
    }

    /// Build a chart over a dataset, or over the last dataframe result when
    /// no dataset id is given. Missing parameters are inferred.
    pub fn request_visualization(
        &self,
        dataset_id: Option<&str>,
        chart_type: Option<ChartKind>,
        x_column: Option<&str>,
        y_column: Option<&str>,
        title: Option<&str>,
    ) -> Result<TypedResult> {
        let frame = match dataset_id {
            Some(id) => self.registry.get(id)?.frame().clone(),
            None => self
                .last_frame
                .lock()
                .expect("last frame lock poisoned")
                .clone()
                .ok_or_else(|| {
                    EngineError::Configuration(
                        "no previous dataframe result to visualize; run a query first".to_string(),
                    )
                })?,
        };
        let question = self
            .last_question
            .lock()
            .expect("last question lock poisoned")
            .clone()
            .unwrap_or_default();

        let request = ChartRequest {
            chart_type,
            x_column: x_column.map(|s| s.to_string()),
            y_column: y_column.map(|s| s.to_string()),
            title: title.map(|s| s.to_string()),
        };
        let spec = build_chart(&frame, &question, &request, &self.config)?;
        Ok(TypedResult::Chart(spec))
    }

    /// Execute a SQL statement directly against the registered datasets.
    /// Read-only statements only.
    pub fn execute_direct_sql(&self, sql_text: &str) -> Result<TypedResult> {
        ensure_read_only(sql_text)?;
        let datasets = self.registry.snapshot(&[])?;
        let sql = SqlExecutor::new(datasets);
        let frame = sql.run(sql_text, None)?;
        *self.last_frame.lock().expect("last frame lock poisoned") = Some(frame.clone());
        Ok(TypedResult::Dataframe(frame))
    }

    /// Textual commentary for a result, for display next to it.
    pub fn analysis_for(&self, result: &TypedResult, question: &str) -> String {
        generate_analysis(result, question)
    }

    /// Drop feedback and successful-query records older than the given age.
    pub fn cleanup_feedback(&self, max_age_days: i64) -> Result<()> {
        self.feedback
            .lock()
            .expect("feedback lock poisoned")
            .cleanup_old_records(max_age_days)
    }

    /// Generation calls served by the backend so far (all resolutions).
    pub fn backend_calls(&self) -> usize {
        self.adapter.backend().calls()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().expect("memory lock poisoned").len()
    }
}

/// Strip statement patterns that have no place in a question.
fn sanitize_question(question: &str) -> String {
    let dangerous = [
        r"(?i)DROP\s+TABLE",
        r"(?i)DELETE\s+FROM",
        r"(?i)TRUNCATE\s+TABLE",
        r"(?i)ALTER\s+TABLE",
        r"(?i)CREATE\s+TABLE",
        r"(?i)INSERT\s+INTO",
        r"(?i)UPDATE\s+\S+\s+SET",
        r"(?i)\bEXEC(UTE)?\s",
    ];
    let mut sanitized = question.to_string();
    for pattern in dangerous {
        sanitized = Regex::new(pattern)
            .expect("static regex")
            .replace_all(&sanitized, "")
            .to_string();
    }
    sanitized.trim().to_string()
}

/// Direct SQL is a read-only surface; mutating statements are rejected
/// outright rather than rewritten.
fn ensure_read_only(sql_text: &str) -> Result<()> {
    let forbidden = Regex::new(
        r"(?i)^\s*(DROP|DELETE|TRUNCATE|ALTER|CREATE|UPDATE|INSERT|GRANT|REVOKE)\b",
    )
    .expect("static regex");
    if forbidden.is_match(sql_text) {
        return Err(EngineError::Configuration(
            "only read-only SQL statements are allowed".to_string(),
        ));
    }
    Ok(())
}

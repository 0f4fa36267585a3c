//! Query-to-Code Adapter.
//!
//! Assembles the generation request (schemas + conversation window + hints
//! + the sandbox contract) and drives the pluggable backend. The adapter
//! does not judge the safety of what comes back; that is the sandbox's job.

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::GenerationError;
use crate::feedback::FeedbackManager;
use crate::llm::{CandidateCode, CodeGenerator, PromptContext};
use crate::memory::ConversationMemory;
use std::sync::Arc;
use tracing::debug;

const FEW_SHOT_EXAMPLES: usize = 2;

pub struct QueryToCodeAdapter {
    backend: Arc<dyn CodeGenerator>,
    config: EngineConfig,
}

impl QueryToCodeAdapter {
    pub fn new(backend: Arc<dyn CodeGenerator>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn CodeGenerator> {
        &self.backend
    }

    /// One generation call under the configured timeout. A timeout maps to
    /// `GenerationError::Timeout` and consumes one attempt upstream.
    pub async fn generate(
        &self,
        question: &str,
        datasets: &[Arc<Dataset>],
        memory: &ConversationMemory,
        feedback: &FeedbackManager,
        hint: Option<&str>,
    ) -> std::result::Result<CandidateCode, GenerationError> {
        let context = self.build_context(question, datasets, memory, feedback, hint);
        debug!(prompt_len = context.user.len(), "requesting code generation");

        match tokio::time::timeout(
            self.config.generation_timeout,
            self.backend.generate(&context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout),
        }
    }

    fn build_context(
        &self,
        question: &str,
        datasets: &[Arc<Dataset>],
        memory: &ConversationMemory,
        feedback: &FeedbackManager,
        hint: Option<&str>,
    ) -> PromptContext {
        let mut parts = Vec::new();

        parts.push("AVAILABLE DATASETS:".to_string());
        for dataset in datasets {
            parts.push(format!("- {}", dataset.schema_summary()));
        }

        let relations: Vec<String> = datasets
            .iter()
            .filter_map(|d| d.semantic.as_ref())
            .flat_map(|s| s.relations.iter())
            .map(|r| {
                format!(
                    "- {}.{} -> {}.{}",
                    r.source_dataset, r.source_column, r.target_dataset, r.target_column
                )
            })
            .collect();
        if !relations.is_empty() {
            parts.push("\nDECLARED RELATIONS (joinable columns):".to_string());
            parts.extend(relations);
        }

        let window = memory.window(self.config.memory_window);
        if !window.is_empty() {
            parts.push("\nPREVIOUS INTERACTIONS (most recent first):".to_string());
            for entry in &window {
                let marker = if entry.accepted { " (confirmed by user)" } else { "" };
                parts.push(format!(
                    "Q: {}{}\nCode:\n{}\nResult: {}",
                    entry.question, marker, entry.code, entry.result_summary
                ));
            }
        }

        let examples = feedback.similar_queries(question, FEW_SHOT_EXAMPLES);
        if !examples.is_empty() {
            parts.push("\nKNOWN-GOOD EXAMPLES FOR SIMILAR QUESTIONS:".to_string());
            for example in examples {
                parts.push(format!("Q: {}\nCode:\n{}", example.question, example.code));
            }
        }

        if let Some(hint) = hint {
            parts.push(format!("\nCORRECTION HINT:\n{hint}"));
        }

        parts.push(format!("\nUSER QUESTION: {question}"));

        PromptContext {
            system: system_prompt(),
            user: parts.join("\n"),
        }
    }
}

/// Contract the backend must follow so the sandbox can execute its output.
fn system_prompt() -> String {
    [
        "You write short scripts that answer questions about tabular data.",
        "Rules:",
        "- One statement per line, each of the form `name = expression`.",
        "- Allowed expressions: execute_sql_query(\"<SQL>\"), datasets[\"<id>\"],",
        "  head(frame, n), tail(frame, n), select(frame, [\"col\", ...]),",
        "  sort(frame, \"col\") or sort(frame, \"col\", desc), count(frame),",
        "  sum_of(frame, \"col\"), mean_of(frame, \"col\"), round_to(x, digits),",
        "  numeric or quoted string literals, or a previously bound name.",
        "- SQL queries may reference any dataset by its id as a table name.",
        "- The final statement must be:",
        "  result = {\"type\": \"<dataframe|chart|number|string>\", \"value\": <name>}",
        "- Start the reply with a line `-- output: <type>` naming the result type.",
        "- Reply with the script only. No prose, no imports, no other functions.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;
    use polars::prelude::*;

    fn sales_dataset() -> Arc<Dataset> {
        let frame = df!["month" => ["Jan"], "total" => [1.0]].unwrap();
        Arc::new(Dataset::new("sales", "", frame, None).unwrap())
    }

    fn adapter() -> QueryToCodeAdapter {
        QueryToCodeAdapter::new(Arc::new(MockGenerator::new()), EngineConfig::default())
    }

    #[test]
    fn prompt_embeds_schema_memory_and_hint() {
        let adapter = adapter();
        let mut memory = ConversationMemory::new();
        memory.push("previous question", "df = ...", "3 rows", true);
        let feedback = FeedbackManager::new();

        let context = adapter.build_context(
            "total per month",
            &[sales_dataset()],
            &memory,
            &feedback,
            Some("column 'totl' not found; closest match 'total'"),
        );

        assert!(context.user.contains("sales (1 rows)"));
        assert!(context.user.contains("previous question"));
        assert!(context.user.contains("(confirmed by user)"));
        assert!(context.user.contains("closest match 'total'"));
        assert!(context.user.trim_end().ends_with("USER QUESTION: total per month"));
    }

    #[tokio::test]
    async fn generate_uses_the_injected_backend() {
        let backend = Arc::new(MockGenerator::new());
        let adapter = QueryToCodeAdapter::new(backend.clone(), EngineConfig::default());
        let memory = ConversationMemory::new();
        let feedback = FeedbackManager::new();

        let candidate = adapter
            .generate("anything", &[sales_dataset()], &memory, &feedback, None)
            .await
            .unwrap();
        assert!(candidate.code.contains("execute_sql_query"));
        assert_eq!(backend.calls(), 1);
    }
}

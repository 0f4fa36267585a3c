//! User feedback records and the successful query→code store.
//!
//! Both feed back into generation: successful pairs become few-shot
//! examples, comments become refinement hints. State is process-lifetime by
//! default; a storage directory makes it survive restarts as JSON files.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub question: String,
    pub result_summary: String,
    pub accepted: bool,
    pub comment: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredQuery {
    pub question: String,
    pub code: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Default, Clone)]
pub struct FeedbackManager {
    records: Vec<FeedbackRecord>,
    successful_queries: HashMap<String, StoredQuery>,
    storage_dir: Option<PathBuf>,
}

impl FeedbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager backed by JSON files under `dir`. Existing files are
    /// reloaded; unreadable state is logged and ignored.
    pub fn with_storage(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut manager = Self {
            storage_dir: Some(dir.clone()),
            ..Self::default()
        };

        match std::fs::read_to_string(dir.join("feedback.json")) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(records) => manager.records = records,
                Err(e) => warn!("ignoring corrupt feedback store: {e}"),
            },
            Err(_) => {}
        }
        match std::fs::read_to_string(dir.join("successful_queries.json")) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(queries) => manager.successful_queries = queries,
                Err(e) => warn!("ignoring corrupt query store: {e}"),
            },
            Err(_) => {}
        }

        manager
    }

    pub fn record_feedback(
        &mut self,
        question: &str,
        result_summary: &str,
        accepted: bool,
        comment: Option<&str>,
    ) {
        self.records.push(FeedbackRecord {
            question: question.to_string(),
            result_summary: result_summary.to_string(),
            accepted,
            comment: comment.map(|c| c.to_string()),
            timestamp: chrono::Utc::now(),
        });
        info!(question, accepted, "recorded feedback");
        self.persist();
    }

    /// Store a question→code pair that executed successfully.
    pub fn record_success(&mut self, question: &str, code: &str) {
        let key = normalize(question);
        self.successful_queries.insert(
            key,
            StoredQuery {
                question: question.to_string(),
                code: code.to_string(),
                timestamp: chrono::Utc::now(),
            },
        );
        self.persist();
    }

    /// Fold a user comment into a hint string for the next generation call.
    pub fn suggest_refinement(&self, question: &str, comment: &str) -> String {
        let mut hint = format!(
            "The user asked to adjust the previous answer to \"{question}\": {comment}."
        );
        if let Some(similar) = self.similar_queries(question, 1).first() {
            hint.push_str(&format!(
                " A previously successful approach for \"{}\" was:\n{}",
                similar.question, similar.code
            ));
        }
        hint
    }

    /// Successful pairs ranked by term overlap with `question`, best first.
    pub fn similar_queries(&self, question: &str, max_results: usize) -> Vec<&StoredQuery> {
        let question_terms: Vec<String> = normalize(question)
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();

        let mut scored: Vec<(f64, &StoredQuery)> = self
            .successful_queries
            .iter()
            .filter_map(|(key, stored)| {
                let stored_terms: Vec<&str> = key.split_whitespace().collect();
                let common = question_terms
                    .iter()
                    .filter(|t| stored_terms.contains(&t.as_str()))
                    .count();
                let denom = question_terms.len().max(stored_terms.len());
                if denom == 0 {
                    return None;
                }
                let score = common as f64 / denom as f64;
                (score > 0.3).then_some((score, stored))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(max_results).map(|(_, q)| q).collect()
    }

    /// Accepted records relevant to `question`, most recent first.
    pub fn relevant_feedback(&self, question: &str, max_results: usize) -> Vec<&FeedbackRecord> {
        let question_terms: Vec<String> = normalize(question)
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();

        let mut relevant: Vec<&FeedbackRecord> = self
            .records
            .iter()
            .filter(|record| {
                let stored = normalize(&record.question);
                let common = question_terms
                    .iter()
                    .filter(|t| stored.split_whitespace().any(|s| s == t.as_str()))
                    .count();
                common > 2 || question_terms.iter().any(|t| stored.contains(t.as_str()))
            })
            .collect();
        relevant.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        relevant.truncate(max_results);
        relevant
    }

    /// Drop records older than `max_age_days` from both stores.
    pub fn cleanup_old_records(&mut self, max_age_days: i64) -> Result<()> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days);
        let before = self.records.len() + self.successful_queries.len();
        self.records.retain(|r| r.timestamp >= cutoff);
        self.successful_queries.retain(|_, q| q.timestamp >= cutoff);
        let removed = before - (self.records.len() + self.successful_queries.len());
        if removed > 0 {
            info!(removed, "cleaned up old feedback records");
        }
        self.persist();
        Ok(())
    }

    fn persist(&self) {
        let Some(dir) = &self.storage_dir else { return };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("cannot create feedback store dir: {e}");
            return;
        }
        let write = |name: &str, value: serde_json::Result<String>| match value {
            Ok(json) => {
                if let Err(e) = std::fs::write(dir.join(name), json) {
                    warn!("failed to persist {name}: {e}");
                }
            }
            Err(e) => warn!("failed to serialize {name}: {e}"),
        };
        write("feedback.json", serde_json::to_string_pretty(&self.records));
        write(
            "successful_queries.json",
            serde_json::to_string_pretty(&self.successful_queries),
        );
    }
}

fn normalize(question: &str) -> String {
    question.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_queries_rank_by_overlap() {
        let mut manager = FeedbackManager::new();
        manager.record_success("total sales per month", "a = 1");
        manager.record_success("count customers in region", "b = 2");

        let similar = manager.similar_queries("sales per month", 2);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].question, "total sales per month");
    }

    #[test]
    fn refinement_hint_carries_the_comment() {
        let manager = FeedbackManager::new();
        let hint = manager.suggest_refinement("total sales", "show as a bar chart instead");
        assert!(hint.contains("show as a bar chart instead"));
        assert!(hint.contains("total sales"));
    }

    #[test]
    fn persistence_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut manager = FeedbackManager::with_storage(dir.path());
            manager.record_feedback("q", "12 rows", true, Some("looks right"));
            manager.record_success("q", "df = execute_sql_query(\"SELECT 1\")");
        }
        let reloaded = FeedbackManager::with_storage(dir.path());
        assert_eq!(reloaded.records.len(), 1);
        assert_eq!(reloaded.successful_queries.len(), 1);
    }

    #[test]
    fn cleanup_drops_old_records() {
        let mut manager = FeedbackManager::new();
        manager.record_feedback("q", "r", true, None);
        manager.records[0].timestamp = chrono::Utc::now() - chrono::Duration::days(60);
        manager.cleanup_old_records(30).unwrap();
        assert!(manager.records.is_empty());
    }
}

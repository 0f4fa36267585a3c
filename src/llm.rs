//! Generative backend boundary.
//!
//! Providers are interchangeable behind `CodeGenerator`: one method, a
//! closed error set, injected via `Arc<dyn CodeGenerator>`. The core never
//! sees provider details.

use crate::error::GenerationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Output type the backend asserts for its generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Dataframe,
    Chart,
    Number,
    String,
}

impl FromStr for OutputKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dataframe" => Ok(OutputKind::Dataframe),
            "chart" | "plot" => Ok(OutputKind::Chart),
            "number" => Ok(OutputKind::Number),
            "string" | "text" => Ok(OutputKind::String),
            _ => Err(()),
        }
    }
}

/// Code returned by a backend together with its asserted output type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateCode {
    pub code: String,
    pub asserted_type: OutputKind,
}

/// Fully rendered context for one generation call. Built by the adapter;
/// backends treat it as opaque prompt text.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(
        &self,
        context: &PromptContext,
    ) -> std::result::Result<CandidateCode, GenerationError>;

    /// Number of generation calls served so far.
    fn calls(&self) -> usize;
}

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiGenerator {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
    calls: AtomicUsize,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        context: &PromptContext,
    ) -> std::result::Result<CandidateCode, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": context.system},
                {"role": "user", "content": context.user}
            ],
            "temperature": 0.1,
            "max_tokens": 1200
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::InvalidResponse(format!("request failed: {e}"))
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(GenerationError::QuotaExceeded);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(format!("malformed body: {e}")))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                GenerationError::InvalidResponse("no content in backend response".to_string())
            })?;

        parse_backend_reply(content)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Split the backend reply into code and asserted type.
///
/// The prompt asks for an `-- output: <type>` header above the code; when
/// the header is missing the type defaults to `dataframe`. Markdown fences
/// are stripped.
pub fn parse_backend_reply(
    content: &str,
) -> std::result::Result<CandidateCode, GenerationError> {
    let stripped = strip_code_fences(content);
    let mut asserted_type = OutputKind::Dataframe;
    let mut code_lines = Vec::new();

    for line in stripped.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("-- output:") {
            if let Ok(kind) = rest.parse::<OutputKind>() {
                asserted_type = kind;
            }
            continue;
        }
        code_lines.push(line);
    }

    let code = code_lines.join("\n").trim().to_string();
    if code.is_empty() {
        return Err(GenerationError::InvalidResponse(
            "backend returned no code".to_string(),
        ));
    }

    Ok(CandidateCode { code, asserted_type })
}

fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip an optional language tag on the fence line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
        return body.trim().to_string();
    }
    trimmed.to_string()
}

/// Deterministic backend for tests and offline runs.
///
/// Responses are served from a scripted queue; when the queue is empty the
/// generator falls back to a plain preview query over the first dataset
/// named in the prompt context.
pub struct MockGenerator {
    responses: Mutex<VecDeque<std::result::Result<CandidateCode, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(
        responses: Vec<std::result::Result<CandidateCode, GenerationError>>,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// User prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("mock prompt lock poisoned").clone()
    }

    pub fn push_code(&self, code: &str, asserted_type: OutputKind) {
        self.responses
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Ok(CandidateCode {
                code: code.to_string(),
                asserted_type,
            }));
    }

    pub fn push_error(&self, error: GenerationError) {
        self.responses
            .lock()
            .expect("mock queue lock poisoned")
            .push_back(Err(error));
    }

    fn fallback(&self, context: &PromptContext) -> CandidateCode {
        // First dataset mentioned in the prompt's schema section, if any.
        let dataset = context
            .user
            .lines()
            .find_map(|line| line.strip_prefix("- ").map(|rest| rest.to_string()))
            .and_then(|line| line.split_whitespace().next().map(|s| s.to_string()))
            .unwrap_or_else(|| "data".to_string());

        CandidateCode {
            code: format!(
                "df = execute_sql_query(\"SELECT * FROM {dataset} LIMIT 10\")\n\
                 result = {{\"type\": \"dataframe\", \"value\": df}}"
            ),
            asserted_type: OutputKind::Dataframe,
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeGenerator for MockGenerator {
    async fn generate(
        &self,
        context: &PromptContext,
    ) -> std::result::Result<CandidateCode, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("mock prompt lock poisoned")
            .push(context.user.clone());
        let next = self
            .responses
            .lock()
            .expect("mock queue lock poisoned")
            .pop_front();
        match next {
            Some(response) => response,
            None => Ok(self.fallback(context)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_header_and_fences() {
        let reply = "```sql\n-- output: number\nn = count(df)\nresult = {\"type\": \"number\", \"value\": n}\n```";
        let candidate = parse_backend_reply(reply).unwrap();
        assert_eq!(candidate.asserted_type, OutputKind::Number);
        assert!(candidate.code.starts_with("n = count(df)"));
    }

    #[test]
    fn empty_reply_is_invalid_response() {
        assert!(matches!(
            parse_backend_reply("```\n```"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn mock_serves_queue_then_fallback() {
        let generator = MockGenerator::new();
        generator.push_error(GenerationError::Timeout);
        let context = PromptContext {
            system: String::new(),
            user: "- sales (3 rows): ...".to_string(),
        };

        assert!(generator.generate(&context).await.is_err());
        let fallback = generator.generate(&context).await.unwrap();
        assert!(fallback.code.contains("FROM sales"));
        assert_eq!(generator.calls(), 2);
    }
}

//! Answer generation over retrieved context.
//!
//! [`answer`] runs a thresholded search and hands the matches to a
//! [`Completer`] together with a system prompt and the user's question.
//! The OpenAI provider sends three messages: the system prompt, the
//! context as a JSON array, and the question.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CompletionConfig;
use crate::error::{IndexError, Result};
use crate::models::{Namespace, ScoredMatch, SearchFilter};
use crate::retriever::Retriever;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Sent in place of the context when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant context was found for this question.";

/// Default system prompt for `ask`.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Answer the user's question using only the provided \
context. If the context does not contain the answer, say so.";

/// Model service used to write the final answer.
#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` grounded in `context`. An empty `context` means
    /// retrieval returned nothing.
    async fn complete(&self, prompt: &Prompt, context: &[ScoredMatch]) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub question: String,
}

/// A generated answer and the matches it was grounded in.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredMatch>,
}

/// Retrieve up to `k` matches scored at least `threshold` and ask the model.
#[allow(clippy::too_many_arguments)]
pub async fn answer(
    retriever: &Retriever,
    completer: &dyn Completer,
    namespace: &Namespace,
    system_prompt: &str,
    query: &str,
    k: i64,
    threshold: f32,
    filter: Option<&SearchFilter>,
) -> Result<Answer> {
    if query.trim().is_empty() {
        return Err(IndexError::invalid("query must not be empty"));
    }

    let sources = retriever
        .search_with_threshold(namespace, query, k, filter, threshold)
        .await?;
    if sources.is_empty() {
        warn!(namespace = %namespace, "no context retrieved, answering without it");
    }

    let prompt = Prompt {
        system: system_prompt.to_string(),
        question: query.to_string(),
    };
    let text = completer.complete(&prompt, &sources).await?;
    info!(namespace = %namespace, model = completer.model_name(), sources = sources.len(), "answer generated");

    Ok(Answer { text, sources })
}

/// Context message body: a JSON array of matches, or [`NO_CONTEXT`].
pub fn render_context(context: &[ScoredMatch]) -> Result<String> {
    if context.is_empty() {
        return Ok(NO_CONTEXT.to_string());
    }

    #[derive(Serialize)]
    struct ContextItem<'a> {
        source_path: &'a str,
        sequence_index: usize,
        collection: &'a str,
        score: f32,
        text: &'a str,
    }

    let items: Vec<ContextItem> = context
        .iter()
        .map(|m| ContextItem {
            source_path: &m.source_path,
            sequence_index: m.sequence_index,
            collection: &m.collection,
            score: m.score,
            text: &m.text,
        })
        .collect();
    serde_json::to_string_pretty(&items)
        .map_err(|e| IndexError::invalid(format!("cannot encode context: {}", e)))
}

// ============ Disabled Provider ============

pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &Prompt, _context: &[ScoredMatch]) -> Result<String> {
        Err(IndexError::ModelUnavailable(
            "completion provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Chat completions against `POST {api_base}/chat/completions`.
///
/// Requires `OPENAI_API_KEY`. Unlike embeddings, completions are not
/// retried: a 429 surfaces immediately as [`IndexError::RateLimited`].
pub struct OpenAICompleter {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| IndexError::invalid("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Completer for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt, context: &[ScoredMatch]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": render_context(context)?},
                {"role": "user", "content": prompt.question},
            ],
        });
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let msg = format!("OpenAI API error {}: {}", status, body_text);
            return Err(if status.as_u16() == 429 {
                IndexError::RateLimited(msg)
            } else {
                IndexError::ModelUnavailable(msg)
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            IndexError::ModelUnavailable("invalid OpenAI response: missing message content".into())
        })
}

/// Create the configured [`Completer`].
pub fn create_completer(config: &CompletionConfig) -> Result<Box<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompleter)),
        "openai" => Ok(Box::new(OpenAICompleter::new(config)?)),
        other => Err(IndexError::invalid(format!(
            "unknown completion provider: {}",
            other
        ))),
    }
}

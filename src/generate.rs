//! Query generation: schema-grounded prompt → language model → SQL.

use regex::Regex;
use std::sync::{Arc, LazyLock};

use nl_query_core::models::{SchemaMetadata, TableRef};
use nl_query_core::prompt::{build_generation_prompt, GENERATION_SYSTEM_PROMPT};

use crate::config::LlmConfig;
use crate::error::QueryError;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^```[a-z]*\s*\n?(.*?)\n?\s*```$").expect("valid regex")
});

/// Generation settings; per-call options override them.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub model: String,
    pub temperature: f32,
}

impl GenerationDefaults {
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
        }
    }
}

pub struct QueryGenerator {
    model: Arc<dyn LanguageModel>,
    defaults: GenerationDefaults,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, defaults: GenerationDefaults) -> Self {
        Self { model, defaults }
    }

    /// Generate a statement answering `question` over `schemas`.
    ///
    /// `qualify` renders each table the way the executing source accepts
    /// it; the prompt lists that form beside the logical key.
    ///
    /// The reply is trimmed and unwrapped from a Markdown code fence if the
    /// model added one; it is not otherwise validated. A model failure or
    /// an empty reply is [`QueryError::Upstream`].
    pub async fn generate(
        &self,
        question: &str,
        schemas: &[SchemaMetadata],
        dialect: &str,
        qualify: &(dyn Fn(&TableRef) -> String + Sync),
        options: &CompletionOptions,
    ) -> Result<String, QueryError> {
        let prompt = build_generation_prompt(question, schemas, dialect, qualify);
        let options = CompletionOptions {
            model: options.model.clone().or_else(|| Some(self.defaults.model.clone())),
            temperature: options.temperature.or(Some(self.defaults.temperature)),
            max_tokens: options.max_tokens,
        };
        let messages = [
            ChatMessage::system(GENERATION_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];

        let reply = self
            .model
            .complete(&messages, &options)
            .await
            .map_err(|e| {
                tracing::error!(error = %format!("{:#}", e), "query generation failed");
                QueryError::upstream("query generation failed", e)
            })?;

        let sql = clean_reply(&reply);
        if sql.is_empty() {
            tracing::error!("language model returned an empty query");
            return Err(QueryError::upstream(
                "query generation failed",
                anyhow::anyhow!("language model returned an empty reply"),
            ));
        }
        tracing::debug!(sql = %sql, "query generated");
        Ok(sql)
    }
}

fn clean_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    match CODE_FENCE.captures(trimmed) {
        Some(c) => c.get(1).map_or("", |m| m.as_str()).trim().to_string(),
        None => trimmed.to_string(),
    }
}

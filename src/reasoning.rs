//! Natural-language explanation of an executed query.

use std::sync::Arc;

use nl_query_core::models::TabularResult;
use nl_query_core::prompt::{build_reasoning_prompt, REASONING_FALLBACK, REASONING_SYSTEM_PROMPT};

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};

pub struct ReasoningGenerator {
    model: Arc<dyn LanguageModel>,
    options: CompletionOptions,
}

impl ReasoningGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, options: CompletionOptions) -> Self {
        Self { model, options }
    }

    pub fn from_config(model: Arc<dyn LanguageModel>, llm: &LlmConfig) -> Self {
        Self::new(
            model,
            CompletionOptions::new(llm.reasoning_model(), llm.reasoning_temperature),
        )
    }

    /// Explain `result` in prose. Never fails: a model error or empty
    /// reply yields [`REASONING_FALLBACK`].
    pub async fn explain(&self, question: &str, sql: &str, result: &TabularResult) -> String {
        let messages = [
            ChatMessage::system(REASONING_SYSTEM_PROMPT),
            ChatMessage::user(build_reasoning_prompt(question, sql, result)),
        ];
        match self.model.complete(&messages, &self.options).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("reasoning model returned an empty reply");
                REASONING_FALLBACK.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "reasoning generation failed");
                REASONING_FALLBACK.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use serde_json::Value;

    #[tokio::test]
    async fn failures_fall_back_to_fixed_text() {
        let model = Arc::new(ScriptedModel::new(vec![Err("timeout"), Ok(""), Ok(" Sales rose. ")]));
        let reasoning = ReasoningGenerator::from_config(model.clone(), &LlmConfig::default());
        let empty = TabularResult::empty(Value::Null);

        assert_eq!(reasoning.explain("q", "SELECT 1", &empty).await, REASONING_FALLBACK);
        assert_eq!(reasoning.explain("q", "SELECT 1", &empty).await, REASONING_FALLBACK);
        assert_eq!(reasoning.explain("q", "SELECT 1", &empty).await, "Sales rose.");

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].0[1].content.contains("No rows returned"));
        assert_eq!(prompts[0].1.temperature, Some(0.3));
    }
}

//! Chat-completion language models.
//!
//! Defines the [`LanguageModel`] trait the generator, reasoning stage,
//! RAG responder, and model classifier depend on, plus implementations:
//! - **[`DisabledModel`]** — always errors; used when `llm.provider = "disabled"`.
//! - **[`OpenAIChat`]** — `POST {base}/chat/completions` (OpenAI or any compatible server).
//! - **[`OllamaChat`]** — `POST {url}/api/chat` on a local Ollama instance.
//!
//! Both network clients share the retry loop in [`crate::http`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-call overrides. Unset fields fall back to the model's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: Some(model.into()),
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Default model identifier (e.g. `"gpt-4"`).
    fn model_name(&self) -> &str;

    /// Complete a conversation and return the assistant's text.
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions)
        -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _: &[ChatMessage], _: &CompletionOptions) -> Result<String> {
        bail!("Language model is disabled (set llm.provider in config)")
    }
}

// ============ OpenAI ============

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
        });
        if let Some(max) = options.max_tokens {
            body["max_tokens"] = json!(max);
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let json = http::post_json(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI API",
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

/// Chat against a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "stream": false,
            "options": { "temperature": options.temperature.unwrap_or(self.temperature) },
        });
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let json = http::post_json(&self.client, &url, None, &body, self.max_retries, "Ollama API")
            .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

/// Create the configured [`LanguageModel`].
///
/// | Config Value | Model |
/// |-------------|-------|
/// | `"disabled"` | [`DisabledModel`] |
/// | `"openai"` | [`OpenAIChat`] |
/// | `"ollama"` | [`OllamaChat`] |
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "openai" => Ok(Box::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let v = serde_json::to_value([ChatMessage::system("s"), ChatMessage::user("u")]).unwrap();
        assert_eq!(v[0]["role"], "system");
        assert_eq!(v[1]["content"], "u");
    }

    #[test]
    fn parses_openai_content() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]});
        assert_eq!(parse_openai_response(&json).unwrap(), "SELECT 1");
        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn disabled_model_errors() {
        let err = DisabledModel
            .complete(&[ChatMessage::user("hi")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn openai_compatible_server_roundtrip() {
        let (url, _) = test_server::serve(vec![(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"SELECT COUNT(*) FROM orders"}}]}"#
                .into(),
        )])
        .await;
        let config = LlmConfig {
            provider: "openai".into(),
            url: Some(url),
            max_retries: 0,
            ..LlmConfig::default()
        };
        let model = OpenAIChat::with_key(&config, "test".into()).unwrap();
        let out = model
            .complete(&[ChatMessage::user("count orders")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "SELECT COUNT(*) FROM orders");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = LlmConfig {
            provider: "bard".into(),
            ..LlmConfig::default()
        };
        assert!(create_model(&config).is_err());
    }
}

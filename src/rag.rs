//! Retrieval-augmented answers from a data source's knowledge collection.
//!
//! The `rag` path never generates SQL. It retrieves the catalog records
//! closest to the question (by embedding when a provider is configured,
//! in index order otherwise), grounds a chat completion on them, and
//! returns the answer with the records it cited from.

use std::sync::Arc;

use nl_query_core::models::{DataSourceId, RagResult, RagSource};
use nl_query_core::prompt::{build_rag_prompt, RAG_SYSTEM_PROMPT};
use nl_query_core::store::{uniform_probe, KnowledgeStore, PayloadFilter};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::QueryError;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};

pub struct RagResponder {
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn LanguageModel>,
    collection_prefix: String,
    source_label: String,
    probe_dims: usize,
    limit: usize,
    options: CompletionOptions,
}

impl RagResponder {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        config: &Config,
    ) -> Self {
        Self {
            knowledge,
            embedder,
            model,
            collection_prefix: config.knowledge.collection_prefix.clone(),
            source_label: config.knowledge.source_label.clone(),
            probe_dims: config.knowledge.probe_dims,
            limit: config.knowledge.rag_limit,
            options: CompletionOptions::new(&config.llm.model, config.llm.reasoning_temperature),
        }
    }

    /// Answer `question` from the catalog of data source `id`.
    ///
    /// A source that has never been indexed is [`QueryError::NotFound`].
    pub async fn answer(&self, id: DataSourceId, question: &str) -> Result<RagResult, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidInput("Question is required".to_string()));
        }
        let collection = id.collection_name(&self.collection_prefix);
        let exists = self
            .knowledge
            .collection_exists(&collection)
            .await
            .map_err(|e| QueryError::upstream("knowledge lookup failed", e))?;
        if !exists {
            return Err(QueryError::NotFound(format!(
                "Data source {} has no indexed knowledge",
                id
            )));
        }

        let probe = if self.embedder.is_enabled() {
            embed_query(self.embedder.as_ref(), question)
                .await
                .map_err(|e| QueryError::upstream("question embedding failed", e))?
        } else {
            uniform_probe(self.probe_dims, 0.1)
        };
        let filter = PayloadFilter::new().must("source", self.source_label.as_str());
        let hits = self
            .knowledge
            .search(&collection, &probe, &filter, self.limit)
            .await
            .map_err(|e| QueryError::upstream("knowledge search failed", e))?;
        tracing::debug!(data_source = %id, hits = hits.len(), "catalog entries retrieved");

        let messages = [
            ChatMessage::system(RAG_SYSTEM_PROMPT),
            ChatMessage::user(build_rag_prompt(question, &hits)),
        ];
        let content = self
            .model
            .complete(&messages, &self.options)
            .await
            .map_err(|e| {
                tracing::error!(error = %format!("{:#}", e), "rag completion failed");
                QueryError::upstream("answer generation failed", e)
            })?;

        Ok(RagResult {
            content: Some(content.trim().to_string()),
            sources: Some(
                hits.into_iter()
                    .map(|h| RagSource {
                        id: h.id,
                        score: h.score,
                        payload: h.payload,
                    })
                    .collect(),
            ),
        })
    }
}

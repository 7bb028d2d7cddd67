//! Assembly of every component from configuration.
//!
//! [`QueryService::from_config`] is the single place collaborators are
//! constructed. Components receive their dependencies as `Arc<dyn Trait>`
//! at construction; nothing reaches for a global.

use anyhow::{Context, Result};
use std::sync::Arc;

use nl_query_core::store::memory::InMemoryKnowledgeStore;
use nl_query_core::store::KnowledgeStore;

use crate::config::Config;
use crate::connector_sqlite::SqliteConnector;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::execute::QueryExecutor;
use crate::generate::{GenerationDefaults, QueryGenerator};
use crate::indexer::SchemaIndexer;
use crate::llm::{create_model, CompletionOptions, LanguageModel};
use crate::migrate;
use crate::notify::LogSink;
use crate::pipeline::QueryPipeline;
use crate::rag::RagResponder;
use crate::reasoning::ReasoningGenerator;
use crate::router::{create_classifier, Router};
use crate::schema::{ResolverSettings, SchemaResolver};
use crate::sqlite_store::SqliteKnowledgeStore;
use crate::traits::{SourceConnector, StatusSink};

/// External collaborators the service is built around.
pub struct Collaborators {
    pub connector: Arc<dyn SourceConnector>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub model: Arc<dyn LanguageModel>,
    pub status: Arc<dyn StatusSink>,
}

pub struct QueryService {
    pub config: Config,
    pub connector: Arc<dyn SourceConnector>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub resolver: Arc<SchemaResolver>,
    pub executor: Arc<QueryExecutor>,
    pub pipeline: Arc<QueryPipeline>,
    pub router: Router,
    pub indexer: SchemaIndexer,
}

impl QueryService {
    /// Build the shipped collaborators from `config` and assemble.
    ///
    /// The knowledge store is SQLite-backed when `knowledge.path` is set
    /// and in-memory otherwise.
    pub async fn from_config(config: Config) -> Result<Self> {
        let knowledge: Arc<dyn KnowledgeStore> = match &config.knowledge.path {
            Some(path) => {
                let pool = db::connect(path)
                    .await
                    .with_context(|| format!("Failed to open knowledge store {}", path.display()))?;
                migrate::run_migrations(&pool).await?;
                Arc::new(SqliteKnowledgeStore::new(pool))
            }
            None => {
                tracing::debug!("no knowledge.path configured, using an in-memory store");
                Arc::new(InMemoryKnowledgeStore::new())
            }
        };

        let collaborators = Collaborators {
            connector: Arc::new(SqliteConnector::new(&config.sources)),
            knowledge,
            embedder: Arc::from(create_provider(&config.embedding)?),
            model: Arc::from(create_model(&config.llm)?),
            status: Arc::new(LogSink),
        };
        Self::assemble(config, collaborators)
    }

    /// Wire components around the given collaborators.
    pub fn assemble(config: Config, c: Collaborators) -> Result<Self> {
        let resolver = Arc::new(SchemaResolver::new(
            c.connector.clone(),
            c.knowledge.clone(),
            ResolverSettings::from_config(&config),
        ));
        let executor = Arc::new(QueryExecutor::new(c.connector.clone()));
        let generator = Arc::new(QueryGenerator::new(
            c.model.clone(),
            GenerationDefaults::from_config(&config.llm),
        ));
        let reasoning = Arc::new(ReasoningGenerator::from_config(c.model.clone(), &config.llm));
        let pipeline = Arc::new(
            QueryPipeline::new(resolver.clone(), generator, executor.clone(), reasoning, c.status)
                .with_organization(config.pipeline.organization_id)
                .with_reasoning(config.pipeline.include_reasoning),
        );
        let rag = Arc::new(RagResponder::new(
            c.knowledge.clone(),
            c.embedder.clone(),
            c.model.clone(),
            &config,
        ));
        let classifier = create_classifier(
            &config.pipeline.classifier,
            c.model.clone(),
            CompletionOptions::new(&config.llm.model, 0.0),
        )?;
        let router = Router::new(classifier, pipeline.clone(), rag);
        let indexer = SchemaIndexer::new(resolver.clone(), c.knowledge.clone(), c.embedder, &config);

        Ok(Self {
            config,
            connector: c.connector,
            knowledge: c.knowledge,
            resolver,
            executor,
            pipeline,
            router,
            indexer,
        })
    }
}

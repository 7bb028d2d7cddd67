//! Schema indexing into the knowledge store.
//!
//! `nlq index` introspects a data source and writes one `table` record per
//! table and one `column` record per column into the source's knowledge
//! collection. Once indexed, the schema resolver serves that source from
//! the knowledge tier without touching the warehouse.
//!
//! Record ids are the SHA-256 of the record key, so re-indexing replaces
//! records in place. With an embedding provider configured, each record
//! carries the embedding of its text; otherwise a constant vector, which
//! keeps listing order stable but gives no semantic ranking.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use nl_query_core::models::{DataSourceId, SchemaMetadata, TableRef};
use nl_query_core::store::{
    uniform_probe, KnowledgeRecord, KnowledgeStore, PayloadFilter, RecordPayload, SourceType,
};

use crate::config::Config;
use crate::embedding::{embed_batched, embed_query, EmbeddingProvider};
use crate::schema::{ResolveOptions, SchemaResolver};

/// Summary of one indexing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub data_source_id: DataSourceId,
    pub collection: String,
    pub tables: usize,
    pub columns: usize,
    pub embedded: bool,
    pub rebuilt: bool,
}

/// A table ranked against a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantTable {
    pub table: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub filter_tables: Option<HashSet<String>>,
    /// Drop the collection before writing.
    pub rebuild: bool,
}

pub struct SchemaIndexer {
    resolver: Arc<SchemaResolver>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SchemaIndexer {
    pub fn new(
        resolver: Arc<SchemaResolver>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            knowledge,
            embedder,
            batch_size: config.embedding.batch_size,
        }
    }

    fn collection(&self, id: DataSourceId) -> String {
        id.collection_name(&self.resolver.settings().collection_prefix)
    }

    fn dims(&self) -> usize {
        if self.embedder.is_enabled() {
            self.embedder.dims()
        } else {
            self.resolver.settings().probe_dims
        }
    }

    /// Introspect `id` and write its tables and columns to the knowledge
    /// store.
    pub async fn index(&self, id: DataSourceId, options: &IndexOptions) -> Result<IndexReport> {
        let collection = self.collection(id);
        let live = ResolveOptions {
            filter_tables: options.filter_tables.clone(),
            use_knowledge: false,
        };
        let schemas = self
            .resolver
            .introspect(id, &live)
            .await
            .with_context(|| format!("Failed to introspect data source {}", id))?;

        if options.rebuild && self.knowledge.collection_exists(&collection).await? {
            self.knowledge.delete_collection(&collection).await?;
            tracing::info!(collection = %collection, "dropped knowledge collection");
        }
        self.knowledge
            .create_collection(&collection, self.dims())
            .await
            .with_context(|| format!("Failed to create collection {}", collection))?;

        let label = &self.resolver.settings().source_label;
        let payloads: Vec<RecordPayload> = schemas
            .iter()
            .flat_map(|s| records_for(label, s))
            .collect();
        let tables = payloads
            .iter()
            .filter(|p| p.source_type == SourceType::Table)
            .count();
        let columns = payloads.len() - tables;

        let vectors = if self.embedder.is_enabled() {
            let texts: Vec<String> = payloads
                .iter()
                .map(|p| p.text.clone().unwrap_or_default())
                .collect();
            embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
                .await
                .context("Failed to embed schema records")?
        } else {
            vec![uniform_probe(self.dims(), 1.0); payloads.len()]
        };

        let records: Vec<KnowledgeRecord> = payloads
            .into_iter()
            .zip(vectors)
            .map(|(payload, vector)| KnowledgeRecord {
                id: record_id(&payload),
                vector,
                payload,
            })
            .collect();
        self.knowledge
            .upsert(&collection, &records)
            .await
            .with_context(|| format!("Failed to write records to {}", collection))?;

        tracing::info!(data_source = %id, tables, columns, "schema indexed");
        Ok(IndexReport {
            data_source_id: id,
            collection,
            tables,
            columns,
            embedded: self.embedder.is_enabled(),
            rebuilt: options.rebuild,
        })
    }

    /// Rank indexed tables by similarity to `question`.
    pub async fn find_relevant_tables(
        &self,
        id: DataSourceId,
        question: &str,
        limit: usize,
    ) -> Result<Vec<RelevantTable>> {
        if !self.embedder.is_enabled() {
            bail!("Finding relevant tables requires an embedding provider. Set [embedding] provider in config.");
        }
        let collection = self.collection(id);
        if !self.knowledge.collection_exists(&collection).await? {
            bail!("Data source {} has not been indexed. Run `nlq index {}` first.", id, id);
        }

        let probe = embed_query(self.embedder.as_ref(), question).await?;
        let filter = PayloadFilter::records(&self.resolver.settings().source_label, SourceType::Table);
        let hits = self
            .knowledge
            .search(&collection, &probe, &filter, limit)
            .await?;

        Ok(hits
            .into_iter()
            .map(|h| RelevantTable {
                table: h.payload.table_ref().key(),
                score: h.score,
                description: h.payload.description,
            })
            .collect())
    }
}

/// One table record followed by its column records.
fn records_for(label: &str, schema: &SchemaMetadata) -> Vec<RecordPayload> {
    let table = schema.table_ref();
    let mut out = Vec::with_capacity(schema.columns.len() + 1);

    let mut t = RecordPayload::table(label, &table);
    t.description = schema.description.clone();
    t.row_count = schema.row_count;
    t.text = Some(table_text(&table, schema));
    out.push(t);

    for c in &schema.columns {
        let mut p = RecordPayload::column(label, &table, &c.name, &c.data_type);
        p.description = c.description.clone();
        p.text = Some(match &c.description {
            Some(d) => format!("Column {}.{} ({}): {}", table, c.name, c.data_type, d),
            None => format!("Column {}.{} ({})", table, c.name, c.data_type),
        });
        out.push(p);
    }
    out
}

fn table_text(table: &TableRef, schema: &SchemaMetadata) -> String {
    let cols: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect();
    match &schema.description {
        Some(d) => format!("Table {}: {}. Columns: {}", table, d, cols.join(", ")),
        None => format!("Table {}. Columns: {}", table, cols.join(", ")),
    }
}

fn record_id(payload: &RecordPayload) -> String {
    let key = match &payload.column {
        Some(col) => format!("column:{}.{}", payload.table_ref(), col),
        None => format!("table:{}", payload.table_ref()),
    };
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::schema::ResolverSettings;
    use crate::testing::{column, KeywordEmbedder, StubConnector, StubTable};
    use nl_query_core::store::memory::InMemoryKnowledgeStore;

    const ID: DataSourceId = DataSourceId(3);

    fn connector() -> Arc<StubConnector> {
        Arc::new(StubConnector::with_tables(vec![
            StubTable {
                table: TableRef::new("main", "main", "orders"),
                columns: vec![column("id", "INTEGER"), column("amount", "REAL")],
                rows: 10,
            },
            StubTable {
                table: TableRef::new("main", "main", "audit_log"),
                columns: vec![column("message", "TEXT")],
                rows: 3,
            },
        ]))
    }

    fn indexer(
        connector: Arc<StubConnector>,
        knowledge: Arc<InMemoryKnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (SchemaIndexer, Arc<SchemaResolver>) {
        let resolver = Arc::new(SchemaResolver::new(
            connector,
            knowledge.clone(),
            ResolverSettings::default(),
        ));
        let indexer = SchemaIndexer::new(resolver.clone(), knowledge, embedder, &Config::minimal());
        (indexer, resolver)
    }

    #[test]
    fn record_ids_are_stable_and_distinct() {
        let t = TableRef::new("d", "s", "t");
        let a = record_id(&RecordPayload::table("x", &t));
        assert_eq!(a, record_id(&RecordPayload::table("y", &t)));
        assert_eq!(a.len(), 64);
        assert_ne!(a, record_id(&RecordPayload::column("x", &t, "c", "TEXT")));
    }

    #[tokio::test]
    async fn indexed_source_resolves_from_knowledge() {
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        let (indexer, resolver) = indexer(connector(), knowledge.clone(), Arc::new(DisabledProvider));

        let report = indexer.index(ID, &IndexOptions::default()).await.unwrap();
        assert_eq!((report.tables, report.columns), (2, 3));
        assert!(!report.embedded);
        assert_eq!(knowledge.len("datasource_3"), Some(5));

        // Re-indexing replaces records by id.
        indexer.index(ID, &IndexOptions::default()).await.unwrap();
        assert_eq!(knowledge.len("datasource_3"), Some(5));

        let fresh = connector();
        let resolver = SchemaResolver::new(fresh.clone(), knowledge, resolver.settings().clone());
        let schemas = resolver.resolve(ID, None).await;
        assert_eq!(fresh.calls(), 0);
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].row_count, Some(10));
        assert_eq!(schemas[0].columns[1].name, "amount");
    }

    #[tokio::test]
    async fn relevant_tables_rank_by_embedding() {
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        let embedder = Arc::new(KeywordEmbedder {
            keywords: vec!["order", "amount", "log", "message"],
        });
        let (indexer, _) = indexer(connector(), knowledge, embedder);
        indexer.index(ID, &IndexOptions::default()).await.unwrap();

        let hits = indexer
            .find_relevant_tables(ID, "which log message appeared most?", 2)
            .await
            .unwrap();
        assert_eq!(hits[0].table, "main.main.audit_log");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn relevant_tables_need_embeddings() {
        let (indexer, _) = indexer(
            connector(),
            Arc::new(InMemoryKnowledgeStore::new()),
            Arc::new(DisabledProvider),
        );
        let err = indexer.find_relevant_tables(ID, "orders", 5).await.unwrap_err();
        assert!(err.to_string().contains("embedding provider"));
    }
}

//! Knowledge store abstraction for nl-query.
//!
//! The [`KnowledgeStore`] trait is the vector-indexed metadata surface the
//! schema resolver's knowledge tier and the RAG responder read from, and
//! the schema indexer writes to. Each data source owns one collection of
//! [`KnowledgeRecord`]s describing its tables and columns.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! The in-memory implementation lives in [`memory`]; the SQLite-backed one
//! lives in the app crate.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::TableRef;

/// Kind of object a knowledge record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Table,
    Column,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Table => "table",
            SourceType::Column => "column",
        }
    }
}

/// Payload stored alongside each vector.
///
/// `source` labels the system the record was indexed from (e.g.
/// `"snowflake"`, `"sqlite"`); table identity fields are always present,
/// column fields only on `column` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub source: String,
    pub source_type: SourceType,
    pub database: String,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RecordPayload {
    pub fn table(source: &str, table: &TableRef) -> Self {
        Self {
            source: source.to_string(),
            source_type: SourceType::Table,
            database: table.database.clone(),
            schema: table.schema.clone(),
            table: table.table.clone(),
            column: None,
            data_type: None,
            description: None,
            row_count: None,
            text: None,
        }
    }

    pub fn column(source: &str, table: &TableRef, column: &str, data_type: &str) -> Self {
        Self {
            source_type: SourceType::Column,
            column: Some(column.to_string()),
            data_type: Some(data_type.to_string()),
            ..Self::table(source, table)
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.database, &self.schema, &self.table)
    }

    /// Look up a filterable field by its wire name.
    pub fn field(&self, key: &str) -> Option<&str> {
        match key {
            "source" => Some(&self.source),
            "sourceType" => Some(self.source_type.as_str()),
            "database" => Some(&self.database),
            "schema" => Some(&self.schema),
            "table" => Some(&self.table),
            "column" => self.column.as_deref(),
            "dataType" => self.data_type.as_deref(),
            _ => None,
        }
    }
}

/// A vector plus its payload, addressed by a stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

/// A search hit. `score` is cosine similarity to the probe vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub payload: RecordPayload,
}

/// Exact-match condition on a payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub key: String,
    pub value: String,
}

/// Conjunction of exact-match conditions; an empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFilter {
    pub must: Vec<FieldMatch>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, key: &str, value: impl Into<String>) -> Self {
        self.must.push(FieldMatch {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    /// Records of one kind from one indexed source.
    pub fn records(source: &str, kind: SourceType) -> Self {
        Self::new()
            .must("source", source)
            .must("sourceType", kind.as_str())
    }

    /// Column records of a single table.
    pub fn columns_of(source: &str, table: &TableRef) -> Self {
        Self::records(source, SourceType::Column)
            .must("database", table.database.as_str())
            .must("schema", table.schema.as_str())
            .must("table", table.table.as_str())
    }

    pub fn matches(&self, payload: &RecordPayload) -> bool {
        self.must
            .iter()
            .all(|m| payload.field(&m.key) == Some(m.value.as_str()))
    }
}

/// Abstract vector-indexed knowledge store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`collection_exists`](KnowledgeStore::collection_exists) | Whether a data source has indexed knowledge |
/// | [`create_collection`](KnowledgeStore::create_collection) | Create an empty collection (idempotent) |
/// | [`delete_collection`](KnowledgeStore::delete_collection) | Drop a collection and its records |
/// | [`upsert`](KnowledgeStore::upsert) | Insert or replace records by id |
/// | [`search`](KnowledgeStore::search) | Filtered similarity search |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn create_collection(&self, name: &str, dims: usize) -> Result<()>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn upsert(&self, collection: &str, records: &[KnowledgeRecord]) -> Result<()>;

    /// Return up to `limit` records matching `filter`, best match first.
    ///
    /// Records whose vector cannot be compared to `probe` (different
    /// length, zero norm) score `0.0` and keep insertion order among
    /// equal scores, so a filter-only listing is deterministic.
    async fn search(
        &self,
        collection: &str,
        probe: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>>;
}

/// A constant probe vector used for filter-driven listing when no query
/// embedding is available.
pub fn uniform_probe(dims: usize, fill: f32) -> Vec<f32> {
    vec![fill; dims]
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched, or
/// zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Pack a vector as little-endian `f32` bytes for BLOB columns.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Order hits best-first (stable for ties) and keep the top `limit`.
pub fn rank(mut hits: Vec<ScoredRecord>, limit: usize) -> Vec<ScoredRecord> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

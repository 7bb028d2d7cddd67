//! Core data models used throughout nl-query.
//!
//! These types describe the schema context, routing decisions, tabular
//! results, and response envelopes that flow through the question → SQL
//! pipeline. All of them are plain values built and consumed within a
//! single request. Wire shapes serialize with camelCase field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::store::RecordPayload;

/// Identifier of a registered data source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DataSourceId(pub i64);

impl DataSourceId {
    /// Name of the knowledge collection scoped to this data source.
    pub fn collection_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully-qualified identity of a table: `database.schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// The `database.schema.table` key used by table allow-lists.
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }

    /// Parse a `database.schema.table` key. Returns `None` unless the key
    /// has exactly three non-empty parts.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [d, s, t] if !d.is_empty() && !s.is_empty() && !t.is_empty() => {
                Some(Self::new(*d, *s, *t))
            }
            _ => None,
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

/// One column of a [`SchemaMetadata`] entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Normalized description of one table, used to ground query generation.
///
/// A table is only reported by the schema resolver when `columns` is
/// non-empty, and the `database.schema.table` key is unique within one
/// resolution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMetadata {
    pub database: String,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rows: Option<Vec<Vec<Value>>>,
    pub columns: Vec<ColumnMetadata>,
}

impl SchemaMetadata {
    pub fn new(table: &TableRef, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            database: table.database.clone(),
            schema: table.schema.clone(),
            table: table.table.clone(),
            description: None,
            row_count: None,
            sample_rows: None,
            columns,
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.database, &self.schema, &self.table)
    }

    pub fn key(&self) -> String {
        self.table_ref().key()
    }
}

/// Query output normalized to column-ordered rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub status: String,
    pub metadata: Value,
}

impl TabularResult {
    /// A well-formed result with no columns and no rows.
    pub fn empty(metadata: Value) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            status: "success".to_string(),
            metadata,
        }
    }
}

/// Per-stage latency of one pipeline run, in milliseconds.
///
/// `total` spans the whole run, reasoning included, so
/// `total >= sql_generation + execution` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub total: u64,
    pub sql_generation: u64,
    pub execution: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<u64>,
}

/// Result of the natural-language → SQL → execution pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlQueryResult {
    pub sql: String,
    pub result: TabularResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timing: Timing,
}

/// Strategy chosen to answer a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
    Rag,
    CodeExecution,
    Hybrid,
}

impl ProcessingPath {
    pub const ALL: [ProcessingPath; 3] = [
        ProcessingPath::Rag,
        ProcessingPath::CodeExecution,
        ProcessingPath::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingPath::Rag => "rag",
            ProcessingPath::CodeExecution => "code_execution",
            ProcessingPath::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ProcessingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rag" => Ok(ProcessingPath::Rag),
            "code_execution" | "code" | "sql" => Ok(ProcessingPath::CodeExecution),
            "hybrid" => Ok(ProcessingPath::Hybrid),
            other => Err(format!("unknown processing path: '{}'", other)),
        }
    }
}

/// Outcome of the routing classifier for one question.
///
/// `confidence` is the classifier's certainty in the chosen path, in
/// `[0, 1]`; it is not a distribution over the alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub path: ProcessingPath,
    pub confidence: f64,
    pub processing_time_ms: u64,
}

/// The `routing` block of the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSummary {
    pub path: ProcessingPath,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

impl From<&RoutingDecision> for RoutingSummary {
    fn from(d: &RoutingDecision) -> Self {
        Self {
            path: d.path,
            confidence: d.confidence,
            processing_time: Some(d.processing_time_ms),
        }
    }
}

/// A knowledge record that contributed to a RAG answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSource {
    pub id: String,
    pub score: f32,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

/// Payload of the `rag` path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<RagSource>>,
}

/// Payload of the `code_execution` path. `content` carries the
/// reasoning text when it was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub data: NlQueryResult,
}

/// Payload of the `hybrid` path: whichever sub-paths succeeded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_result: Option<RagResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution_result: Option<CodeExecutionResult>,
}

/// Path-specific result payload. Callers switch on
/// [`QueryResult::path`] (or the envelope's `routing.path`) before
/// reading path-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Rag(RagResult),
    CodeExecution(CodeExecutionResult),
    Hybrid(HybridResult),
}

impl QueryResult {
    pub fn path(&self) -> ProcessingPath {
        match self {
            QueryResult::Rag(_) => ProcessingPath::Rag,
            QueryResult::CodeExecution(_) => ProcessingPath::CodeExecution,
            QueryResult::Hybrid(_) => ProcessingPath::Hybrid,
        }
    }
}

/// Response envelope of the routed-query surface:
/// `{ routing: { path, confidence, processingTime? }, result }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub routing: RoutingSummary,
    pub result: QueryResult,
}

impl QueryResponse {
    pub fn new(decision: &RoutingDecision, result: QueryResult) -> Self {
        Self {
            routing: RoutingSummary::from(decision),
            result,
        }
    }

    /// Whether the payload shape matches the routed path.
    pub fn is_consistent(&self) -> bool {
        self.routing.path == self.result.path()
    }
}

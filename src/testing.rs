//! Stub collaborators shared by unit tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use nl_query_core::models::{DataSourceId, TableRef};

use crate::embedding::EmbeddingProvider;
use crate::error::ConnectorError;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};
use crate::traits::{ColumnDescriptor, NativeResult, SourceConnector, StatusEvent, StatusSink};

pub(crate) fn column(name: &str, data_type: &str) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.into(),
        data_type: data_type.into(),
        kind: Some("COLUMN".into()),
        nullable: true,
        default: None,
        primary_key: false,
        comment: None,
    }
}

pub(crate) struct StubTable {
    pub table: TableRef,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: i64,
}

/// Connector serving a fixed catalog. Counts every call.
#[derive(Default)]
pub(crate) struct StubConnector {
    pub tables: Vec<StubTable>,
    pub answer: NativeResult,
    pub failing_describe: HashSet<String>,
    pub failing_count: HashSet<String>,
    pub fail_queries: bool,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl StubConnector {
    pub fn with_tables(tables: Vec<StubTable>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn find(&self, sql: &str) -> Option<&StubTable> {
        self.tables.iter().find(|t| sql.contains(&self.qualify(&t.table)))
    }
}

#[async_trait]
impl SourceConnector for StubConnector {
    async fn execute_query(&self, _id: DataSourceId, sql: &str) -> Result<NativeResult, ConnectorError> {
        self.hit();
        if let Ok(mut q) = self.queries.lock() {
            q.push(sql.to_string());
        }
        if self.fail_queries {
            return Err(ConnectorError::query("syntax error"));
        }
        if sql.starts_with("SELECT COUNT(*) FROM") {
            let t = self
                .find(sql)
                .ok_or_else(|| ConnectorError::not_found("no such table"))?;
            if self.failing_count.contains(&t.table.key()) {
                return Err(ConnectorError::query("count timed out"));
            }
            let mut row = Map::new();
            row.insert("COUNT(*)".into(), json!(t.rows));
            return Ok(NativeResult {
                columns: vec!["COUNT(*)".into()],
                rows: Some(vec![row]),
                metadata: Value::Null,
            });
        }
        if sql.starts_with("SELECT * FROM") {
            let t = self
                .find(sql)
                .ok_or_else(|| ConnectorError::not_found("no such table"))?;
            let mut row = Map::new();
            for c in &t.columns {
                row.insert(c.name.clone(), json!(format!("{}-sample", c.name)));
            }
            return Ok(NativeResult {
                columns: t.columns.iter().map(|c| c.name.clone()).collect(),
                rows: Some(vec![row]),
                metadata: Value::Null,
            });
        }
        Ok(self.answer.clone())
    }

    async fn list_databases(&self, _id: DataSourceId) -> Result<Vec<String>, ConnectorError> {
        self.hit();
        let mut out: Vec<String> = Vec::new();
        for t in &self.tables {
            if !out.contains(&t.table.database) {
                out.push(t.table.database.clone());
            }
        }
        Ok(out)
    }

    async fn list_schemas(&self, _id: DataSourceId, db: &str) -> Result<Vec<String>, ConnectorError> {
        self.hit();
        let mut out: Vec<String> = Vec::new();
        for t in self.tables.iter().filter(|t| t.table.database == db) {
            if !out.contains(&t.table.schema) {
                out.push(t.table.schema.clone());
            }
        }
        Ok(out)
    }

    async fn list_tables(&self, _id: DataSourceId, db: &str, schema: &str) -> Result<Vec<String>, ConnectorError> {
        self.hit();
        Ok(self
            .tables
            .iter()
            .filter(|t| t.table.database == db && t.table.schema == schema)
            .map(|t| t.table.table.clone())
            .collect())
    }

    async fn describe_table(&self, _id: DataSourceId, table: &TableRef) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
        self.hit();
        if self.failing_describe.contains(&table.key()) {
            return Err(ConnectorError::unavailable("connection reset"));
        }
        self.tables
            .iter()
            .find(|t| &t.table == table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| ConnectorError::not_found(format!("table {} not found", table)))
    }
}

/// Language model replaying scripted replies in order. An `Err` entry
/// fails that call; running out of replies fails too.
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    pub prompts: Mutex<Vec<(Vec<ChatMessage>, CompletionOptions)>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<&str, &str>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push((messages.to_vec(), options.clone()));
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => bail!("{}", e),
            None => bail!("no scripted reply left"),
        }
    }
}

/// Bag-of-keywords embedder: one dimension per keyword, set when the
/// text mentions it.
pub(crate) struct KeywordEmbedder {
    pub keywords: Vec<&'static str>,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }
    fn dims(&self) -> usize {
        self.keywords.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                self.keywords
                    .iter()
                    .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

/// Status sink that records events.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: Mutex<Vec<StatusEvent>>,
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn emit(&self, event: StatusEvent) -> Result<()> {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
        Ok(())
    }
}

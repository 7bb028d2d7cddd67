//! Collaborator traits consumed by the pipeline.
//!
//! The pipeline never talks to a warehouse or a notification channel
//! directly; it goes through the traits here, injected once when the
//! [`QueryService`](crate::service::QueryService) is assembled.
//!
//! ```text
//!  SchemaResolver ──┐
//!  QueryExecutor  ──┼──▶ SourceConnector ──▶ SQLite / warehouse
//!  SchemaIndexer  ──┘
//!
//!  QueryPipeline  ─────▶ StatusSink ──▶ log / broadcast channel
//! ```
//!
//! The knowledge store and language model traits live next to their
//! implementations in [`nl_query_core::store`] and [`crate::llm`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nl_query_core::models::{DataSourceId, TableRef};

use crate::error::ConnectorError;

// ═══════════════════════════════════════════════════════════════════════
// Source Connector
// ═══════════════════════════════════════════════════════════════════════

/// Result of a statement in the connector's native shape.
///
/// Rows are records keyed by column name. `rows == None` means the source
/// reported no row set at all, which the executor treats the same as zero
/// rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeResult {
    pub columns: Vec<String>,
    pub rows: Option<Vec<Map<String, Value>>>,
    pub metadata: Value,
}

/// One column as reported by [`SourceConnector::describe_table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Live access to a tabular data source.
///
/// Implementations own connection reuse: at most one live connection (or
/// pool) per data source, re-established transparently when missing.
/// Every method takes the [`DataSourceId`] so one connector instance can
/// serve many sources.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`execute_query`](SourceConnector::execute_query) | Run one statement |
/// | [`list_databases`](SourceConnector::list_databases) | Enumerate databases |
/// | [`list_schemas`](SourceConnector::list_schemas) | Enumerate schemas of a database |
/// | [`list_tables`](SourceConnector::list_tables) | Enumerate tables of a schema |
/// | [`describe_table`](SourceConnector::describe_table) | Column structure of a table |
/// | [`dialect`](SourceConnector::dialect) | SQL dialect name for prompts |
/// | [`qualify`](SourceConnector::qualify) | Dialect-correct table reference |
///
/// # Errors
///
/// Failures are [`ConnectorError`]s. A missing data source, database,
/// schema, or table must use [`ConnectorErrorKind::NotFound`](crate::error::ConnectorErrorKind::NotFound)
/// so callers never have to inspect message text.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use nl_query::error::ConnectorError;
/// use nl_query::traits::{ColumnDescriptor, NativeResult, SourceConnector};
/// use nl_query_core::models::{DataSourceId, TableRef};
///
/// struct EmptyWarehouse;
///
/// #[async_trait]
/// impl SourceConnector for EmptyWarehouse {
///     async fn execute_query(&self, _id: DataSourceId, _sql: &str) -> Result<NativeResult, ConnectorError> {
///         Ok(NativeResult::default())
///     }
///     async fn list_databases(&self, _id: DataSourceId) -> Result<Vec<String>, ConnectorError> {
///         Ok(vec![])
///     }
///     async fn list_schemas(&self, _id: DataSourceId, _db: &str) -> Result<Vec<String>, ConnectorError> {
///         Ok(vec![])
///     }
///     async fn list_tables(&self, _id: DataSourceId, _db: &str, _schema: &str) -> Result<Vec<String>, ConnectorError> {
///         Ok(vec![])
///     }
///     async fn describe_table(&self, _id: DataSourceId, t: &TableRef) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
///         Err(ConnectorError::not_found(format!("table {} does not exist", t)))
///     }
/// }
/// ```
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn execute_query(&self, id: DataSourceId, sql: &str)
        -> Result<NativeResult, ConnectorError>;

    async fn list_databases(&self, id: DataSourceId) -> Result<Vec<String>, ConnectorError>;

    async fn list_schemas(
        &self,
        id: DataSourceId,
        database: &str,
    ) -> Result<Vec<String>, ConnectorError>;

    async fn list_tables(
        &self,
        id: DataSourceId,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, ConnectorError>;

    async fn describe_table(
        &self,
        id: DataSourceId,
        table: &TableRef,
    ) -> Result<Vec<ColumnDescriptor>, ConnectorError>;

    /// Dialect name used in generation prompts (e.g. `"Snowflake"`).
    fn dialect(&self) -> &str {
        "SQL"
    }

    /// A table reference the source accepts in a `FROM` clause.
    ///
    /// Defaults to a double-quoted three-part name.
    fn qualify(&self, table: &TableRef) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&table.database),
            quote_ident(&table.schema),
            quote_ident(&table.table)
        )
    }

    /// Cheap liveness check.
    async fn ping(&self, id: DataSourceId) -> Result<(), ConnectorError> {
        self.execute_query(id, "SELECT 1").await.map(|_| ())
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ═══════════════════════════════════════════════════════════════════════
// Status Sink
// ═══════════════════════════════════════════════════════════════════════

/// Pipeline progress reported to a [`StatusSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    ResolvingSchema,
    GeneratingQuery,
    Executing,
    Completed,
    Failed,
}

/// One status notification, scoped to an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub data_source_id: DataSourceId,
    pub organization_id: i64,
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(data_source_id: DataSourceId, organization_id: i64, status: PipelineStatus) -> Self {
        Self {
            data_source_id,
            organization_id,
            status,
            metrics: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, metrics: Value) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Delivery channel name for the event's organization.
    pub fn room(&self) -> String {
        format!("org_{}", self.organization_id)
    }
}

/// Best-effort receiver of [`StatusEvent`]s.
///
/// Emission returns an error so sinks can report delivery problems, but
/// the pipeline only logs them; a failing sink never aborts a query.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn emit(&self, event: StatusEvent) -> anyhow::Result<()>;
}

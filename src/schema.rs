//! Two-tier schema resolution.
//!
//! [`SchemaResolver::resolve`] produces the [`SchemaMetadata`] that grounds
//! query generation:
//!
//! 1. **Knowledge tier.** Read the data source's knowledge collection:
//!    every `table` record, then each table's `column` records. No call
//!    reaches the source, so this works while the source is offline. A
//!    missing collection yields nothing.
//! 2. **Introspection tier.** Only when the knowledge tier found no
//!    tables (or was skipped): walk databases → schemas → tables on the
//!    live source, then describe, sample, and count each table. A table
//!    whose fetches fail is left out; the rest still resolve.
//!
//! Per-table work in both tiers fans out on a [`JoinSet`], bounded by a
//! semaphore, and is gathered back into enumeration order. Resolution
//! itself never fails: errors are logged and an empty list comes back,
//! since generation can still run without schema context.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use nl_query_core::models::{ColumnMetadata, DataSourceId, SchemaMetadata, TableRef};
use nl_query_core::prompt::{infer_column_description, infer_table_purpose};
use nl_query_core::store::{uniform_probe, KnowledgeStore, PayloadFilter, ScoredRecord, SourceType};

use crate::config::Config;
use crate::execute::{normalize, scalar_i64};
use crate::traits::SourceConnector;

/// Fill used for the constant listing probe.
const PROBE_FILL: f32 = 0.1;

/// Data type reported for indexed columns that carry none.
const DEFAULT_COLUMN_TYPE: &str = "string";

/// Tunables for both tiers.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub collection_prefix: String,
    pub source_label: String,
    pub table_limit: usize,
    pub column_limit: usize,
    pub probe_dims: usize,
    pub sample_rows: usize,
    pub max_concurrency: usize,
    pub infer_descriptions: bool,
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection_prefix: config.knowledge.collection_prefix.clone(),
            source_label: config.knowledge.source_label.clone(),
            table_limit: config.knowledge.table_limit,
            column_limit: config.knowledge.column_limit,
            probe_dims: config.knowledge.probe_dims,
            sample_rows: config.introspection.sample_rows,
            max_concurrency: config.introspection.max_concurrency,
            infer_descriptions: config.introspection.infer_descriptions,
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

/// Per-call resolution options.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Allow-list of `database.schema.table` keys. `None` or empty keeps
    /// every table.
    pub filter_tables: Option<HashSet<String>>,
    /// Try the knowledge tier first. When `false`, go straight to
    /// introspection.
    pub use_knowledge: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            filter_tables: None,
            use_knowledge: true,
        }
    }
}

impl ResolveOptions {
    pub fn with_filter<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_tables: Some(tables.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    fn keeps(&self, key: &str) -> bool {
        match &self.filter_tables {
            Some(f) if !f.is_empty() => f.contains(key),
            _ => true,
        }
    }
}

pub struct SchemaResolver {
    connector: Arc<dyn SourceConnector>,
    knowledge: Arc<dyn KnowledgeStore>,
    settings: ResolverSettings,
}

impl SchemaResolver {
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        knowledge: Arc<dyn KnowledgeStore>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            connector,
            knowledge,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve with an optional table allow-list, knowledge tier first.
    pub async fn resolve(
        &self,
        id: DataSourceId,
        filter_tables: Option<&HashSet<String>>,
    ) -> Vec<SchemaMetadata> {
        let options = ResolveOptions {
            filter_tables: filter_tables.cloned(),
            use_knowledge: true,
        };
        self.resolve_with(id, &options).await
    }

    /// Resolve from the live source only.
    pub async fn resolve_live(
        &self,
        id: DataSourceId,
        filter_tables: Option<&HashSet<String>>,
    ) -> Vec<SchemaMetadata> {
        let options = ResolveOptions {
            filter_tables: filter_tables.cloned(),
            use_knowledge: false,
        };
        self.resolve_with(id, &options).await
    }

    pub async fn resolve_with(&self, id: DataSourceId, options: &ResolveOptions) -> Vec<SchemaMetadata> {
        if options.use_knowledge {
            match self.from_knowledge(id, options).await {
                Ok(schemas) if !schemas.is_empty() => {
                    tracing::info!(data_source = %id, tables = schemas.len(), "schema resolved from knowledge");
                    return schemas;
                }
                Ok(_) => {
                    tracing::info!(data_source = %id, "no indexed knowledge, falling back to introspection");
                }
                Err(e) => {
                    tracing::warn!(data_source = %id, error = %format!("{:#}", e), "knowledge lookup failed, falling back to introspection");
                }
            }
        }

        match self.introspect(id, options).await {
            Ok(schemas) => {
                tracing::info!(data_source = %id, tables = schemas.len(), "schema resolved by introspection");
                schemas
            }
            Err(e) => {
                tracing::error!(data_source = %id, error = %format!("{:#}", e), "schema introspection failed");
                Vec::new()
            }
        }
    }

    /// Knowledge tier. Never calls the source connector.
    pub async fn from_knowledge(
        &self,
        id: DataSourceId,
        options: &ResolveOptions,
    ) -> Result<Vec<SchemaMetadata>> {
        let collection = id.collection_name(&self.settings.collection_prefix);
        if !self
            .knowledge
            .collection_exists(&collection)
            .await
            .with_context(|| format!("checking collection {}", collection))?
        {
            tracing::debug!(data_source = %id, collection = %collection, "no knowledge collection");
            return Ok(Vec::new());
        }

        let probe = uniform_probe(self.settings.probe_dims, PROBE_FILL);
        let table_hits = self
            .knowledge
            .search(
                &collection,
                &probe,
                &PayloadFilter::records(&self.settings.source_label, SourceType::Table),
                self.settings.table_limit,
            )
            .await
            .with_context(|| format!("listing tables in {}", collection))?;

        let mut seen = HashSet::new();
        let tables: Vec<ScoredRecord> = table_hits
            .into_iter()
            .filter(|h| {
                let key = h.payload.table_ref().key();
                options.keeps(&key) && seen.insert(key)
            })
            .collect();

        let knowledge = self.knowledge.clone();
        let label = self.settings.source_label.clone();
        let column_limit = self.settings.column_limit;
        let columns = fan_out(
            tables.iter().map(|h| h.payload.table_ref()).collect(),
            self.settings.max_concurrency,
            |table: TableRef| {
                let knowledge = knowledge.clone();
                let collection = collection.clone();
                let probe = probe.clone();
                let filter = PayloadFilter::columns_of(&label, &table);
                async move { knowledge.search(&collection, &probe, &filter, column_limit).await }
            },
        )
        .await;

        let mut schemas = Vec::with_capacity(tables.len());
        for (hit, cols) in tables.into_iter().zip(columns) {
            let table = hit.payload.table_ref();
            let cols = match cols {
                Some(Ok(cols)) => cols,
                Some(Err(e)) => return Err(e.context(format!("listing columns of {}", table))),
                None => Vec::new(),
            };
            let columns: Vec<ColumnMetadata> = cols
                .into_iter()
                .filter_map(|c| {
                    let name = c.payload.column?;
                    Some(ColumnMetadata {
                        name,
                        data_type: c
                            .payload
                            .data_type
                            .unwrap_or_else(|| DEFAULT_COLUMN_TYPE.to_string()),
                        description: c.payload.description.filter(|d| !d.is_empty()),
                    })
                })
                .collect();
            if columns.is_empty() {
                tracing::debug!(table = %table, "indexed table has no columns, skipping");
                continue;
            }
            let mut schema = SchemaMetadata::new(&table, columns);
            schema.description = hit.payload.description.filter(|d| !d.is_empty());
            schema.row_count = hit.payload.row_count;
            schemas.push(schema);
        }
        Ok(schemas)
    }

    /// Every table the live source exposes, in enumeration order.
    ///
    /// Failing to list databases is an error; a database or schema whose
    /// listing fails is skipped.
    pub async fn list_live_tables(&self, id: DataSourceId) -> Result<Vec<TableRef>> {
        let mut tables = Vec::new();
        let databases = self
            .connector
            .list_databases(id)
            .await
            .context("listing databases")?;
        for db in databases {
            let schemas = match self.connector.list_schemas(id, &db).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(data_source = %id, database = %db, error = %e, "skipping database");
                    continue;
                }
            };
            for schema in schemas {
                match self.connector.list_tables(id, &db, &schema).await {
                    Ok(names) => {
                        tables.extend(names.into_iter().map(|t| TableRef::new(&db, &schema, t)))
                    }
                    Err(e) => {
                        tracing::warn!(data_source = %id, database = %db, schema = %schema, error = %e, "skipping schema");
                    }
                }
            }
        }
        Ok(tables)
    }

    /// Introspection tier.
    pub async fn introspect(
        &self,
        id: DataSourceId,
        options: &ResolveOptions,
    ) -> Result<Vec<SchemaMetadata>> {
        let mut seen = HashSet::new();
        let candidates: Vec<TableRef> = self
            .list_live_tables(id)
            .await?
            .into_iter()
            .filter(|t| {
                let key = t.key();
                options.keeps(&key) && seen.insert(key)
            })
            .collect();

        let connector = self.connector.clone();
        let sample_rows = self.settings.sample_rows;
        let infer = self.settings.infer_descriptions;
        let results = fan_out(candidates.clone(), self.settings.max_concurrency, |table: TableRef| {
            let connector = connector.clone();
            async move { describe_live(connector.as_ref(), id, &table, sample_rows, infer).await }
        })
        .await;

        let mut schemas = Vec::with_capacity(candidates.len());
        for (table, result) in candidates.iter().zip(results) {
            match result {
                Some(Ok(schema)) => schemas.push(schema),
                Some(Err(e)) => {
                    tracing::warn!(data_source = %id, table = %table, error = %format!("{:#}", e), "excluding table")
                }
                None => {}
            }
        }
        Ok(schemas)
    }
}

/// Describe, sample, and count one table.
async fn describe_live(
    connector: &dyn SourceConnector,
    id: DataSourceId,
    table: &TableRef,
    sample_rows: usize,
    infer: bool,
) -> Result<SchemaMetadata> {
    let described = connector
        .describe_table(id, table)
        .await
        .context("describe failed")?;
    if described.is_empty() {
        anyhow::bail!("table has no columns");
    }

    let qualified = connector.qualify(table);
    let samples = if sample_rows > 0 {
        let sql = format!("SELECT * FROM {} LIMIT {}", qualified, sample_rows);
        let native = connector
            .execute_query(id, &sql)
            .await
            .context("sampling rows failed")?;
        Some(normalize(native).rows)
    } else {
        None
    };

    let count_sql = format!("SELECT COUNT(*) FROM {}", qualified);
    let counted = connector
        .execute_query(id, &count_sql)
        .await
        .context("counting rows failed")?;
    let row_count = scalar_i64(&normalize(counted));

    let columns: Vec<ColumnMetadata> = described
        .into_iter()
        .map(|c| {
            let description = c
                .comment
                .filter(|d| !d.is_empty())
                .or_else(|| infer.then(|| infer_column_description(&c.name, &c.data_type)));
            ColumnMetadata {
                name: c.name,
                data_type: c.data_type,
                description,
            }
        })
        .collect();

    let mut schema = SchemaMetadata::new(table, Vec::new());
    if infer {
        schema.description = Some(infer_table_purpose(&table.table, &columns, row_count));
    }
    schema.columns = columns;
    schema.row_count = row_count;
    schema.sample_rows = samples;
    Ok(schema)
}

/// Run `f` over `inputs` on a [`JoinSet`] with at most `max_concurrency`
/// in flight. Output slot `i` holds the result for input `i`; a task that
/// panicked leaves `None`.
async fn fan_out<I, O, F, Fut>(inputs: Vec<I>, max_concurrency: usize, f: F) -> Vec<Option<O>>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut set = JoinSet::new();
    let n = inputs.len();

    for (i, input) in inputs.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let task = f(input);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (i, task.await)
        });
    }

    let mut out: Vec<Option<O>> = std::iter::repeat_with(|| None).take(n).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, value)) => out[i] = Some(value),
            Err(e) => tracing::error!(error = %e, "schema task failed"),
        }
    }
    out
}

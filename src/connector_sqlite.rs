//! SQLite source connector.
//!
//! Serves every `[[sources]]` entry from one instance. Each data source
//! gets one lazily-opened [`SqlitePool`]; a missing pool (first use, or
//! evicted after a connection-level failure) is reopened on the next call.
//!
//! SQLite has no database level, so the configured `database` name is a
//! logical label and every source exposes exactly that one database. Its
//! schemas are `main` plus any `[[sources.attach]]` aliases.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::collections::HashMap;
use tokio::sync::RwLock;

use nl_query_core::models::{DataSourceId, TableRef};

use crate::config::SourceConfig;
use crate::error::ConnectorError;
use crate::traits::{quote_ident, ColumnDescriptor, NativeResult, SourceConnector};

pub struct SqliteConnector {
    sources: HashMap<DataSourceId, SourceConfig>,
    pools: RwLock<HashMap<DataSourceId, SqlitePool>>,
}

impl SqliteConnector {
    pub fn new(sources: &[SourceConfig]) -> Self {
        Self {
            sources: sources
                .iter()
                .map(|s| (s.data_source_id(), s.clone()))
                .collect(),
            pools: RwLock::new(HashMap::new()),
        }
    }

    fn source(&self, id: DataSourceId) -> Result<&SourceConfig, ConnectorError> {
        self.sources
            .get(&id)
            .ok_or_else(|| ConnectorError::not_found(format!("Data source {} is not registered", id)))
    }

    /// Number of open pools.
    pub async fn open_connections(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Close and forget a data source's pool. The next call reconnects.
    pub async fn disconnect(&self, id: DataSourceId) {
        if let Some(pool) = self.pools.write().await.remove(&id) {
            pool.close().await;
            tracing::debug!(data_source = %id, "closed connection pool");
        }
    }

    async fn pool(&self, id: DataSourceId) -> Result<SqlitePool, ConnectorError> {
        if let Some(pool) = self.pools.read().await.get(&id) {
            return Ok(pool.clone());
        }

        let source = self.source(id)?;
        let mut pools = self.pools.write().await;
        // Another task may have connected while we waited for the lock.
        if let Some(pool) = pools.get(&id) {
            return Ok(pool.clone());
        }
        let pool = open_pool(source).await?;
        tracing::info!(data_source = %id, path = %source.path.display(), "connected");
        pools.insert(id, pool.clone());
        Ok(pool)
    }

    /// Map a sqlx failure, evicting the pool when the connection itself
    /// is at fault.
    async fn fail(&self, id: DataSourceId, err: sqlx::Error) -> ConnectorError {
        match err {
            sqlx::Error::RowNotFound => ConnectorError::not_found("no rows returned"),
            sqlx::Error::Database(db) => ConnectorError::query(db.message().to_string()),
            e @ (sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed) => {
                self.disconnect(id).await;
                ConnectorError::unavailable(e.to_string())
            }
            other => ConnectorError::query(other.to_string()),
        }
    }

    async fn fetch(&self, id: DataSourceId, sql: &str) -> Result<Vec<SqliteRow>, ConnectorError> {
        let pool = self.pool(id).await?;
        match sqlx::query(sql).fetch_all(&pool).await {
            Ok(rows) => Ok(rows),
            Err(e) => Err(self.fail(id, e).await),
        }
    }

    async fn schema_names(&self, id: DataSourceId) -> Result<Vec<String>, ConnectorError> {
        let rows = self.fetch(id, "PRAGMA database_list").await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| ConnectorError::query(e.to_string()))?;
            if name != "temp" {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn check_database(&self, id: DataSourceId, database: &str) -> Result<(), ConnectorError> {
        let source = self.source(id)?;
        if source.database != database {
            return Err(ConnectorError::not_found(format!(
                "Database '{}' does not exist in data source {}",
                database, id
            )));
        }
        Ok(())
    }

    async fn check_schema(
        &self,
        id: DataSourceId,
        database: &str,
        schema: &str,
    ) -> Result<(), ConnectorError> {
        self.check_database(id, database)?;
        if !self.schema_names(id).await?.iter().any(|s| s == schema) {
            return Err(ConnectorError::not_found(format!(
                "Schema '{}.{}' does not exist",
                database, schema
            )));
        }
        Ok(())
    }
}

async fn open_pool(source: &SourceConfig) -> Result<SqlitePool, ConnectorError> {
    if source.path.as_os_str().is_empty() {
        return Err(ConnectorError::invalid_input(format!(
            "Data source '{}' is missing required parameter: path",
            source.name
        )));
    }
    for path in std::iter::once(&source.path).chain(source.attach.iter().map(|a| &a.path)) {
        if !path.exists() {
            return Err(ConnectorError::not_found(format!(
                "Database file {} does not exist",
                path.display()
            )));
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&source.path)
        .read_only(source.read_only)
        .create_if_missing(false);

    let attach: Vec<String> = source
        .attach
        .iter()
        .map(|a| {
            format!(
                "ATTACH DATABASE '{}' AS {}",
                a.path.display().to_string().replace('\'', "''"),
                quote_ident(&a.schema)
            )
        })
        .collect();

    SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let attach = attach.clone();
            Box::pin(async move {
                for stmt in &attach {
                    conn.execute(stmt.as_str()).await?;
                }
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .map_err(|e| ConnectorError::unavailable(format!("Failed to open '{}': {}", source.name, e)))
}

/// Decode one cell by its runtime storage class.
fn cell(row: &SqliteRow, i: usize) -> Value {
    let Ok(raw) = row.try_get_raw(i) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(i)
            .map(|f| serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(i)
            .map(|b| Value::String(format!("x'{}'", hex::encode(b))))
            .unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
    }
}

fn to_record(row: &SqliteRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|c| (c.name().to_string(), cell(row, c.ordinal())))
        .collect()
}

#[async_trait]
impl SourceConnector for SqliteConnector {
    async fn execute_query(
        &self,
        id: DataSourceId,
        sql: &str,
    ) -> Result<NativeResult, ConnectorError> {
        if sql.trim().is_empty() {
            return Err(ConnectorError::invalid_input("Query is required"));
        }
        let rows = self.fetch(id, sql).await?;

        let columns: Vec<String> = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                let pool = self.pool(id).await?;
                match pool.prepare(sql).await {
                    Ok(stmt) => stmt.columns().iter().map(|c| c.name().to_string()).collect(),
                    Err(_) => Vec::new(),
                }
            }
        };

        Ok(NativeResult {
            columns,
            rows: if rows.is_empty() {
                None
            } else {
                Some(rows.iter().map(to_record).collect())
            },
            metadata: json!({ "dataSourceId": id, "dialect": self.dialect() }),
        })
    }

    async fn list_databases(&self, id: DataSourceId) -> Result<Vec<String>, ConnectorError> {
        // Opening the pool proves the source is reachable.
        self.pool(id).await?;
        Ok(vec![self.source(id)?.database.clone()])
    }

    async fn list_schemas(
        &self,
        id: DataSourceId,
        database: &str,
    ) -> Result<Vec<String>, ConnectorError> {
        self.check_database(id, database)?;
        self.schema_names(id).await
    }

    async fn list_tables(
        &self,
        id: DataSourceId,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, ConnectorError> {
        self.check_schema(id, database, schema).await?;
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        );
        self.fetch(id, &sql)
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>(0).map_err(|e| ConnectorError::query(e.to_string())))
            .collect()
    }

    async fn describe_table(
        &self,
        id: DataSourceId,
        table: &TableRef,
    ) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
        self.check_schema(id, &table.database, &table.schema).await?;
        let sql = format!(
            "PRAGMA {}.table_info({})",
            quote_ident(&table.schema),
            quote_ident(&table.table)
        );
        let rows = self.fetch(id, &sql).await?;
        if rows.is_empty() {
            return Err(ConnectorError::not_found(format!(
                "Table {} does not exist",
                table
            )));
        }

        let map = |e: sqlx::Error| ConnectorError::query(e.to_string());
        rows.iter()
            .map(|r| {
                let declared: String = r.try_get("type").map_err(map)?;
                Ok(ColumnDescriptor {
                    name: r.try_get("name").map_err(map)?,
                    // Untyped columns report an empty declared type.
                    data_type: if declared.is_empty() {
                        "ANY".to_string()
                    } else {
                        declared
                    },
                    kind: Some("COLUMN".to_string()),
                    nullable: r.try_get::<i64, _>("notnull").map_err(map)? == 0,
                    default: r.try_get("dflt_value").map_err(map)?,
                    primary_key: r.try_get::<i64, _>("pk").map_err(map)? > 0,
                    comment: None,
                })
            })
            .collect()
    }

    fn dialect(&self) -> &str {
        "SQLite"
    }

    /// `"schema"."table"`; the database level is logical only.
    fn qualify(&self, table: &TableRef) -> String {
        format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorErrorKind;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    async fn make_db(path: &Path, statements: &[&str]) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        for s in statements {
            sqlx::query(s).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    fn source(id: i64, path: PathBuf) -> SourceConfig {
        SourceConfig {
            id,
            name: format!("s{}", id),
            path,
            database: "SALES".into(),
            description: None,
            read_only: true,
            attach: vec![],
        }
    }

    #[tokio::test]
    async fn executes_and_decodes_values() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("sales.sqlite");
        make_db(
            &db,
            &[
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL NOT NULL, note TEXT, raw BLOB)",
                "INSERT INTO orders VALUES (1, 9.5, 'first', x'0aff'), (2, 20.0, NULL, NULL)",
            ],
        )
        .await;
        let c = SqliteConnector::new(&[source(1, db)]);

        let r = c
            .execute_query(DataSourceId(1), "SELECT id, amount, note, raw FROM orders ORDER BY id")
            .await
            .unwrap();
        assert_eq!(r.columns, vec!["id", "amount", "note", "raw"]);
        let rows = r.rows.unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["amount"], json!(9.5));
        assert_eq!(rows[0]["raw"], json!("x'0aff'"));
        assert_eq!(rows[1]["note"], Value::Null);
        assert_eq!(c.open_connections().await, 1);
    }

    #[tokio::test]
    async fn empty_result_keeps_columns() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("sales.sqlite");
        make_db(&db, &["CREATE TABLE orders (id INTEGER, amount REAL)"]).await;
        let c = SqliteConnector::new(&[source(1, db)]);
        let r = c
            .execute_query(DataSourceId(1), "SELECT id, amount FROM orders")
            .await
            .unwrap();
        assert!(r.rows.is_none());
        assert_eq!(r.columns, vec!["id", "amount"]);
    }

    #[tokio::test]
    async fn introspection_walks_attached_schemas() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join("main.sqlite");
        let archive = tmp.path().join("archive.sqlite");
        make_db(&main, &["CREATE TABLE orders (id INTEGER PRIMARY KEY, amount NUMERIC DEFAULT 0)"]).await;
        make_db(&archive, &["CREATE TABLE old_orders (id INTEGER)"]).await;
        let mut s = source(1, main);
        s.attach.push(crate::config::AttachConfig {
            schema: "archive".into(),
            path: archive,
        });
        let c = SqliteConnector::new(&[s]);
        let id = DataSourceId(1);

        assert_eq!(c.list_databases(id).await.unwrap(), vec!["SALES"]);
        assert_eq!(c.list_schemas(id, "SALES").await.unwrap(), vec!["main", "archive"]);
        assert_eq!(c.list_tables(id, "SALES", "archive").await.unwrap(), vec!["old_orders"]);

        let cols = c
            .describe_table(id, &TableRef::new("SALES", "main", "orders"))
            .await
            .unwrap();
        assert_eq!(cols.len(), 2);
        assert!(cols[0].primary_key);
        assert_eq!(cols[1].data_type, "NUMERIC");
        assert_eq!(cols[1].default.as_deref(), Some("0"));

        let r = c
            .execute_query(id, &format!("SELECT COUNT(*) AS n FROM {}", c.qualify(&TableRef::new("SALES", "archive", "old_orders"))))
            .await
            .unwrap();
        assert_eq!(r.rows.unwrap()[0]["n"], json!(0));
    }

    #[tokio::test]
    async fn missing_things_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("sales.sqlite");
        make_db(&db, &["CREATE TABLE orders (id INTEGER)"]).await;
        let c = SqliteConnector::new(&[source(1, db), source(2, tmp.path().join("gone.sqlite"))]);

        let kind = |r: Result<Vec<String>, ConnectorError>| r.unwrap_err().kind;
        assert_eq!(kind(c.list_databases(DataSourceId(9)).await), ConnectorErrorKind::NotFound);
        assert_eq!(kind(c.list_databases(DataSourceId(2)).await), ConnectorErrorKind::NotFound);
        assert_eq!(kind(c.list_schemas(DataSourceId(1), "OTHER").await), ConnectorErrorKind::NotFound);
        assert_eq!(
            kind(c.list_tables(DataSourceId(1), "SALES", "nope").await),
            ConnectorErrorKind::NotFound
        );
        let err = c
            .describe_table(DataSourceId(1), &TableRef::new("SALES", "main", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn empty_path_and_query_are_invalid_input() {
        let c = SqliteConnector::new(&[source(1, PathBuf::new())]);
        let err = c.execute_query(DataSourceId(1), "SELECT 1").await.unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::InvalidInput);
        let err = c.execute_query(DataSourceId(1), "  ").await.unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn reconnects_after_disconnect() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("sales.sqlite");
        make_db(&db, &["CREATE TABLE t (x INTEGER)"]).await;
        let c = SqliteConnector::new(&[source(1, db)]);
        c.ping(DataSourceId(1)).await.unwrap();
        c.disconnect(DataSourceId(1)).await;
        assert_eq!(c.open_connections().await, 0);
        c.ping(DataSourceId(1)).await.unwrap();
        assert_eq!(c.open_connections().await, 1);
    }

    #[tokio::test]
    async fn read_only_sources_reject_writes() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("sales.sqlite");
        make_db(&db, &["CREATE TABLE t (x INTEGER)"]).await;
        let c = SqliteConnector::new(&[source(1, db)]);
        let err = c
            .execute_query(DataSourceId(1), "INSERT INTO t VALUES (1)")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::Query);
    }
}

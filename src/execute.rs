//! Query execution and result normalization.

use serde_json::Value;
use std::sync::Arc;

use nl_query_core::models::{DataSourceId, TableRef, TabularResult};

use crate::error::QueryError;
use crate::traits::{NativeResult, SourceConnector};

/// Runs statements through a [`SourceConnector`] and returns them as
/// [`TabularResult`]s.
pub struct QueryExecutor {
    connector: Arc<dyn SourceConnector>,
}

impl QueryExecutor {
    pub fn new(connector: Arc<dyn SourceConnector>) -> Self {
        Self { connector }
    }

    /// SQL dialect of the underlying connector.
    pub fn dialect(&self) -> &str {
        self.connector.dialect()
    }

    /// How the underlying connector wants `table` written in a statement.
    pub fn qualify(&self, table: &TableRef) -> String {
        self.connector.qualify(table)
    }

    /// Execute `query` against data source `id`.
    ///
    /// An empty or whitespace-only query is rejected with
    /// [`QueryError::InvalidInput`] before the connector is called. A
    /// statement that yields no rows returns an empty, successful result.
    pub async fn execute(&self, id: DataSourceId, query: &str) -> Result<TabularResult, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::InvalidInput("Query is required".to_string()));
        }

        let native = self
            .connector
            .execute_query(id, query)
            .await
            .map_err(|e| {
                tracing::error!(data_source = %id, error = %e, "query execution failed");
                QueryError::from(e)
            })?;

        let result = normalize(native);
        tracing::debug!(data_source = %id, rows = result.row_count, "query executed");
        Ok(result)
    }
}

/// Realign native records to column order. Keys missing from a record
/// become `null`; an absent row set becomes zero rows.
pub fn normalize(native: NativeResult) -> TabularResult {
    let NativeResult {
        mut columns,
        rows,
        metadata,
    } = native;
    let records = rows.unwrap_or_default();

    if columns.is_empty() {
        if let Some(first) = records.first() {
            columns = first.keys().cloned().collect();
        }
    }

    let rows: Vec<Vec<Value>> = records
        .iter()
        .map(|rec| {
            columns
                .iter()
                .map(|c| rec.get(c).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    TabularResult {
        row_count: rows.len(),
        columns,
        rows,
        status: "success".to_string(),
        metadata,
    }
}

/// First cell of the first row as an integer, accepting numeric strings.
pub fn scalar_i64(result: &TabularResult) -> Option<i64> {
    match result.rows.first()?.first()? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use crate::traits::ColumnDescriptor;
    use async_trait::async_trait;
    use nl_query_core::models::TableRef;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        calls: AtomicUsize,
        result: NativeResult,
    }

    #[async_trait]
    impl SourceConnector for CountingConnector {
        async fn execute_query(&self, _: DataSourceId, _: &str) -> Result<NativeResult, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
        async fn list_databases(&self, _: DataSourceId) -> Result<Vec<String>, ConnectorError> {
            Ok(vec![])
        }
        async fn list_schemas(&self, _: DataSourceId, _: &str) -> Result<Vec<String>, ConnectorError> {
            Ok(vec![])
        }
        async fn list_tables(&self, _: DataSourceId, _: &str, _: &str) -> Result<Vec<String>, ConnectorError> {
            Ok(vec![])
        }
        async fn describe_table(&self, _: DataSourceId, _: &TableRef) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
            Ok(vec![])
        }
    }

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn empty_query_never_reaches_connector() {
        let connector = Arc::new(CountingConnector {
            calls: AtomicUsize::new(0),
            result: NativeResult::default(),
        });
        let executor = QueryExecutor::new(connector.clone());
        for q in ["", "   ", "\n\t"] {
            let err = executor.execute(DataSourceId(1), q).await.unwrap_err();
            assert!(matches!(err, QueryError::InvalidInput(_)));
        }
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_rows_is_a_successful_empty_result() {
        let connector = Arc::new(CountingConnector {
            calls: AtomicUsize::new(0),
            result: NativeResult {
                columns: vec!["total".into()],
                rows: None,
                metadata: json!({}),
            },
        });
        let r = QueryExecutor::new(connector)
            .execute(DataSourceId(1), "SELECT SUM(amount) AS total FROM orders WHERE 1 = 0")
            .await
            .unwrap();
        assert_eq!(r.row_count, 0);
        assert!(r.rows.is_empty());
        assert_eq!(r.status, "success");
        assert_eq!(r.columns, vec!["total"]);
    }

    #[test]
    fn records_are_realigned_to_column_order() {
        let r = normalize(NativeResult {
            columns: vec!["b".into(), "a".into(), "c".into()],
            rows: Some(vec![
                record(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]),
                record(&[("a", json!(4))]),
            ]),
            metadata: Value::Null,
        });
        assert_eq!(r.rows, vec![vec![json!(2), json!(1), json!(3)], vec![Value::Null, json!(4), Value::Null]]);
        assert_eq!(r.row_count, 2);
    }

    #[test]
    fn scalar_accepts_numbers_and_numeric_strings() {
        let mk = |v: Value| TabularResult {
            columns: vec!["n".into()],
            rows: vec![vec![v]],
            row_count: 1,
            status: "success".into(),
            metadata: Value::Null,
        };
        assert_eq!(scalar_i64(&mk(json!(42))), Some(42));
        assert_eq!(scalar_i64(&mk(json!("1200"))), Some(1200));
        assert_eq!(scalar_i64(&mk(json!(null))), None);
        assert_eq!(scalar_i64(&TabularResult::empty(Value::Null)), None);
    }
}

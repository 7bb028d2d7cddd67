//! SQLite-backed [`KnowledgeStore`] implementation.
//!
//! Collections are rows in `knowledge_collections`; records live in
//! `knowledge_records` with their vector as a little-endian `f32` BLOB and
//! the full payload as JSON. Filters on table-identity fields are pushed
//! into the `WHERE` clause; similarity is computed in Rust over the rows
//! that pass.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use nl_query_core::store::{
    blob_to_vec, cosine_similarity, rank, vec_to_blob, KnowledgeRecord, KnowledgeStore,
    PayloadFilter, RecordPayload, ScoredRecord,
};

/// SQLite implementation of the [`KnowledgeStore`] trait.
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    /// Wrap a pool whose schema has been created by
    /// [`run_migrations`](crate::migrate::run_migrations).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record count per collection, for status output.
    pub async fn collection_sizes(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name AS name, COUNT(r.id) AS n
            FROM knowledge_collections c
            LEFT JOIN knowledge_records r ON r.collection = c.name
            GROUP BY c.name
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("name")?, r.try_get("n")?)))
            .collect()
    }
}

/// Payload keys backed by an indexed column.
fn pushdown_column(key: &str) -> Option<&'static str> {
    match key {
        "source" => Some("source"),
        "sourceType" => Some("source_type"),
        "database" => Some("database_name"),
        "schema" => Some("schema_name"),
        "table" => Some("table_name"),
        "column" => Some("column_name"),
        _ => None,
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM knowledge_collections WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_collection(&self, name: &str, dims: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_collections (name, dims, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM knowledge_records WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM knowledge_collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[KnowledgeRecord]) -> Result<()> {
        if !self.collection_exists(collection).await? {
            bail!("collection '{}' does not exist", collection);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) FROM knowledge_records WHERE collection = ?",
        )
        .bind(collection)
        .fetch_one(&mut *tx)
        .await?;

        for record in records {
            seq += 1;
            let p = &record.payload;
            let payload_json =
                serde_json::to_string(p).context("Failed to serialize knowledge payload")?;
            // Replacing keeps the original seq so listing order is stable.
            sqlx::query(
                r#"
                INSERT INTO knowledge_records (collection, id, seq, source, source_type,
                                               database_name, schema_name, table_name,
                                               column_name, payload_json, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    source = excluded.source,
                    source_type = excluded.source_type,
                    database_name = excluded.database_name,
                    schema_name = excluded.schema_name,
                    table_name = excluded.table_name,
                    column_name = excluded.column_name,
                    payload_json = excluded.payload_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(seq)
            .bind(&p.source)
            .bind(p.source_type.as_str())
            .bind(&p.database)
            .bind(&p.schema)
            .bind(&p.table)
            .bind(&p.column)
            .bind(&payload_json)
            .bind(vec_to_blob(&record.vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        probe: &[f32],
        filter: &PayloadFilter,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if !self.collection_exists(collection).await? {
            bail!("collection '{}' does not exist", collection);
        }

        let mut sql = String::from(
            "SELECT id, payload_json, embedding FROM knowledge_records WHERE collection = ?",
        );
        let mut values = Vec::new();
        for m in &filter.must {
            if let Some(col) = pushdown_column(&m.key) {
                sql.push_str(&format!(" AND {} = ?", col));
                values.push(m.value.as_str());
            }
        }
        sql.push_str(" ORDER BY seq");

        let mut query = sqlx::query(&sql).bind(collection);
        for v in values {
            query = query.bind(v);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload_json: String = row.try_get("payload_json")?;
            let payload: RecordPayload = serde_json::from_str(&payload_json)
                .context("Corrupt knowledge payload")?;
            if !filter.matches(&payload) {
                continue;
            }
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(ScoredRecord {
                id: row.try_get("id")?,
                score: cosine_similarity(probe, &blob_to_vec(&blob)),
                payload,
            });
        }
        Ok(rank(hits, limit))
    }
}

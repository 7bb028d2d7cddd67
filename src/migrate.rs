use anyhow::Result;
use sqlx::SqlitePool;

/// Create the knowledge store tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per indexed table or column. Filterable payload fields are
    // real columns; the full payload is kept as JSON.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            source TEXT NOT NULL,
            source_type TEXT NOT NULL,
            database_name TEXT NOT NULL,
            schema_name TEXT NOT NULL,
            table_name TEXT NOT NULL,
            column_name TEXT,
            payload_json TEXT NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES knowledge_collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_records_kind ON knowledge_records(collection, source, source_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_records_table ON knowledge_records(collection, database_name, schema_name, table_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

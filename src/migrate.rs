//! Idempotent schema creation for the SQLite stores.
//!
//! One table per store:
//!
//! - `index_records` — record store rows, keyed by `(namespace, key)`,
//!   indexed by `(namespace, group_id)` for scoped cleanup and deletion.
//! - `vector_entries` — embeddings with their payload as typed columns,
//!   keyed by `(namespace, id)`, indexed by `(namespace, source_path)`.
//! - `namespace_leases` — one writer lease per namespace, shared by every
//!   process using the database.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            group_id TEXT NOT NULL,
            last_seen INTEGER NOT NULL,
            PRIMARY KEY (namespace, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            namespace TEXT NOT NULL,
            id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            text TEXT NOT NULL,
            source_path TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            collection TEXT NOT NULL,
            modified_time TEXT,
            PRIMARY KEY (namespace, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS namespace_leases (
            namespace TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_records_group ON index_records(namespace, group_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_entries_source ON vector_entries(namespace, source_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

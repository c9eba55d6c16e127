//! SQLite-backed [`RecordStore`], [`VectorStore`] and [`LeaseStore`]
//! implementations.
//!
//! All wrap a cloned [`SqlitePool`] handle and translate every store
//! operation into statements against the schema created by
//! [`crate::migrate::run_migrations`]. Namespace and payload filters are
//! applied in SQL; similarity is computed over the filtered rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{IndexError, Result};
use crate::lock::LeaseStore;
use crate::models::{
    ChunkPayload, Fingerprint, IndexRecord, Namespace, SearchFilter, VectorEntry, VectorHit,
};
use crate::store::{rank_hits, RecordStore, VectorStore};

/// SQLite implementation of [`RecordStore`] over the `index_records` table.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IndexRecord> {
    let namespace: String = row.try_get("namespace")?;
    Ok(IndexRecord {
        namespace: Namespace::new(namespace)
            .map_err(|e| IndexError::Inconsistent(format!("stored record: {}", e)))?,
        key: Fingerprint::from_hex(row.try_get::<String, _>("key")?),
        group_id: row.try_get("group_id")?,
        last_seen: row.try_get("last_seen")?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_by_namespace(&self, namespace: &Namespace) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(
            "SELECT namespace, key, group_id, last_seen FROM index_records WHERE namespace = ? ORDER BY key",
        )
        .bind(namespace.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get_by_group(
        &self,
        namespace: &Namespace,
        group_id: &str,
    ) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT namespace, key, group_id, last_seen
            FROM index_records
            WHERE namespace = ? AND group_id = ?
            ORDER BY key
            "#,
        )
        .bind(namespace.as_str())
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn upsert(&self, records: &[IndexRecord]) -> Result<()> {
        for r in records {
            r.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO index_records (namespace, key, group_id, last_seen)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(namespace, key) DO UPDATE SET
                    group_id = excluded.group_id,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(r.namespace.as_str())
            .bind(r.key.as_str())
            .bind(&r.group_id)
            .bind(r.last_seen)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_keys(&self, namespace: &Namespace, keys: &[Fingerprint]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for key in keys {
            deleted += sqlx::query("DELETE FROM index_records WHERE namespace = ? AND key = ?")
                .bind(namespace.as_str())
                .bind(key.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted as usize)
    }
}

/// SQLite implementation of [`VectorStore`] over the `vector_entries` table.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn payload_from_row(row: &SqliteRow) -> Result<ChunkPayload> {
    let sequence_index: i64 = row.try_get("sequence_index")?;
    Ok(ChunkPayload {
        text: row.try_get("text")?,
        source_path: row.try_get("source_path")?,
        sequence_index: usize::try_from(sequence_index).map_err(|_| {
            IndexError::Inconsistent(format!("negative sequence_index {}", sequence_index))
        })?,
        collection: row.try_get("collection")?,
        modified_time: row.try_get("modified_time")?,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        for e in entries {
            e.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (namespace, id, embedding, dims, text, source_path,
                                            sequence_index, collection, modified_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    text = excluded.text,
                    source_path = excluded.source_path,
                    sequence_index = excluded.sequence_index,
                    collection = excluded.collection,
                    modified_time = excluded.modified_time
                "#,
            )
            .bind(e.namespace.as_str())
            .bind(e.id.as_str())
            .bind(vec_to_blob(&e.embedding))
            .bind(e.embedding.len() as i64)
            .bind(&e.payload.text)
            .bind(&e.payload.source_path)
            .bind(e.payload.sequence_index as i64)
            .bind(&e.payload.collection)
            .bind(e.payload.modified_time.as_deref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_payloads(
        &self,
        namespace: &Namespace,
        updates: &[(Fingerprint, ChunkPayload)],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for (id, p) in updates {
            let sequence_index = p.sequence_index as i64;
            changed += sqlx::query(
                r#"
                UPDATE vector_entries
                SET text = ?, source_path = ?, sequence_index = ?, collection = ?, modified_time = ?
                WHERE namespace = ? AND id = ?
                  AND (text IS NOT ? OR source_path IS NOT ? OR sequence_index IS NOT ?
                       OR collection IS NOT ? OR modified_time IS NOT ?)
                "#,
            )
            .bind(&p.text)
            .bind(&p.source_path)
            .bind(sequence_index)
            .bind(&p.collection)
            .bind(p.modified_time.as_deref())
            .bind(namespace.as_str())
            .bind(id.as_str())
            .bind(&p.text)
            .bind(&p.source_path)
            .bind(sequence_index)
            .bind(&p.collection)
            .bind(p.modified_time.as_deref())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(changed as usize)
    }

    async fn delete_by_ids(&self, namespace: &Namespace, ids: &[Fingerprint]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for id in ids {
            deleted += sqlx::query("DELETE FROM vector_entries WHERE namespace = ? AND id = ?")
                .bind(namespace.as_str())
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted as usize)
    }

    async fn delete_by_filter(
        &self,
        namespace: &Namespace,
        filter: &SearchFilter,
    ) -> Result<usize> {
        if filter.is_empty() {
            return Err(IndexError::invalid(
                "delete_by_filter requires a non-empty filter",
            ));
        }

        let result = sqlx::query(
            r#"
            DELETE FROM vector_entries
            WHERE namespace = ?
              AND (? IS NULL OR source_path = ?)
              AND (? IS NULL OR collection = ?)
            "#,
        )
        .bind(namespace.as_str())
        .bind(filter.source_path.as_deref())
        .bind(filter.source_path.as_deref())
        .bind(filter.collection.as_deref())
        .bind(filter.collection.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>> {
        let source_path = filter.and_then(|f| f.source_path.as_deref());
        let collection = filter.and_then(|f| f.collection.as_deref());

        let rows = sqlx::query(
            r#"
            SELECT id, embedding, text, source_path, sequence_index, collection, modified_time
            FROM vector_entries
            WHERE namespace = ?
              AND (? IS NULL OR source_path = ?)
              AND (? IS NULL OR collection = ?)
            "#,
        )
        .bind(namespace.as_str())
        .bind(source_path)
        .bind(source_path)
        .bind(collection)
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            hits.push(VectorHit {
                id: Fingerprint::from_hex(row.try_get::<String, _>("id")?),
                namespace: namespace.clone(),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                payload: payload_from_row(row)?,
            });
        }

        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn list_ids(&self, namespace: &Namespace) -> Result<Vec<Fingerprint>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM vector_entries WHERE namespace = ? ORDER BY id")
                .bind(namespace.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(Fingerprint::from_hex).collect())
    }
}

/// SQLite implementation of [`LeaseStore`] over the `namespace_leases` table.
///
/// Every process opening the same database file shares these leases, so
/// separate `ait-index` invocations exclude each other per namespace.
/// Expiry times are Unix milliseconds.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn expiry_after(ttl: Duration) -> (i64, i64) {
    let now = Utc::now().timestamp_millis();
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    (now, now.saturating_add(ttl))
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn try_claim(&self, namespace: &Namespace, owner: &str, ttl: Duration) -> Result<bool> {
        let (now, expires_at) = expiry_after(ttl);
        let result = sqlx::query(
            r#"
            INSERT INTO namespace_leases (namespace, owner, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(namespace) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE namespace_leases.expires_at <= ? OR namespace_leases.owner = excluded.owner
            "#,
        )
        .bind(namespace.as_str())
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self, namespace: &Namespace, owner: &str, ttl: Duration) -> Result<bool> {
        let (_, expires_at) = expiry_after(ttl);
        let result = sqlx::query(
            "UPDATE namespace_leases SET expires_at = ? WHERE namespace = ? AND owner = ?",
        )
        .bind(expires_at)
        .bind(namespace.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, namespace: &Namespace, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM namespace_leases WHERE namespace = ? AND owner = ?")
            .bind(namespace.as_str())
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

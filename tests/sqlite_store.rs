//! SQLite backends against a real database file.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ait_index::commands::Pipeline;
use ait_index::db;
use ait_index::embedding::Embedder;
use ait_index::error::{IndexError, Result};
use ait_index::indexer::IndexerOptions;
use ait_index::lock::{LeaseOptions, LeaseStore, NamespaceLocks};
use ait_index::migrate;
use ait_index::models::{
    ChunkPayload, CleanupMode, Fingerprint, IndexRecord, Namespace, SearchFilter, SourceDocument,
    VectorEntry,
};
use ait_index::sqlite_store::{SqliteLeaseStore, SqliteRecordStore, SqliteVectorStore};
use ait_index::store::{RecordStore, VectorStore};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/ait.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

fn ns(name: &str) -> Namespace {
    Namespace::new(name).unwrap()
}

fn record(namespace: &str, key: &str, group: &str, last_seen: i64) -> IndexRecord {
    IndexRecord {
        namespace: ns(namespace),
        key: Fingerprint::from_hex(key),
        group_id: group.to_string(),
        last_seen,
    }
}

fn entry(namespace: &str, id: &str, path: &str, collection: &str, v: Vec<f32>) -> VectorEntry {
    VectorEntry {
        id: Fingerprint::from_hex(id),
        namespace: ns(namespace),
        embedding: v,
        payload: ChunkPayload {
            text: format!("text {}", id),
            source_path: path.to_string(),
            sequence_index: 3,
            collection: collection.to_string(),
            modified_time: Some("2025-03-01T12:00:00+00:00".to_string()),
        },
    }
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_tmp, pool) = pool().await;
    migrate::run_migrations(&pool).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
}

#[tokio::test]
async fn test_record_store_roundtrip_and_scoping() {
    let (_tmp, pool) = pool().await;
    let store = SqliteRecordStore::new(pool);

    store
        .upsert(&[
            record("x", "k1", "a.txt", 1),
            record("x", "k2", "b.txt", 1),
            record("y", "k1", "a.txt", 1),
        ])
        .await
        .unwrap();
    store.upsert(&[record("x", "k1", "a.txt", 7)]).await.unwrap();

    let all = store.get_by_namespace(&ns("x")).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0], record("x", "k1", "a.txt", 7));

    let group = store.get_by_group(&ns("x"), "b.txt").await.unwrap();
    assert_eq!(group, vec![record("x", "k2", "b.txt", 1)]);

    let removed = store
        .delete_by_keys(&ns("x"), &[Fingerprint::from_hex("k1"), Fingerprint::from_hex("nope")])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.get_by_namespace(&ns("y")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_record_store_rejects_invalid_record() {
    let (_tmp, pool) = pool().await;
    let store = SqliteRecordStore::new(pool);
    assert!(store.upsert(&[record("x", "k1", "", 1)]).await.is_err());
    assert!(store.get_by_namespace(&ns("x")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_vector_store_query_filters_and_ranks() {
    let (_tmp, pool) = pool().await;
    let store = SqliteVectorStore::new(pool);

    store
        .upsert(&[
            entry("x", "near", "a.txt", "bib", vec![1.0, 0.0]),
            entry("x", "mid", "b.txt", "log", vec![0.7, 0.7]),
            entry("x", "far", "a.txt", "bib", vec![0.0, 1.0]),
            entry("y", "other", "a.txt", "bib", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

    let hits = store.query(&ns("x"), &[1.0, 0.0], 2, None).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["near", "mid"]);
    assert_eq!(hits[0].payload.sequence_index, 3);
    assert_eq!(
        hits[0].payload.modified_time.as_deref(),
        Some("2025-03-01T12:00:00+00:00")
    );

    let by_collection = SearchFilter {
        source_path: None,
        collection: Some("log".to_string()),
    };
    let hits = store
        .query(&ns("x"), &[1.0, 0.0], 10, Some(&by_collection))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id.as_str(), "mid");

    let hits = store
        .query(&ns("x"), &[1.0, 0.0], 10, Some(&SearchFilter::source_path("a.txt")))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.namespace == ns("x")));
}

#[tokio::test]
async fn test_vector_store_upsert_replaces_and_deletes() {
    let (_tmp, pool) = pool().await;
    let store = SqliteVectorStore::new(pool);

    store
        .upsert(&[entry("x", "k1", "a.txt", "bib", vec![1.0, 0.0])])
        .await
        .unwrap();
    store
        .upsert(&[entry("x", "k1", "a.txt", "bib", vec![0.0, 1.0])])
        .await
        .unwrap();
    assert_eq!(store.list_ids(&ns("x")).await.unwrap().len(), 1);

    let hits = store.query(&ns("x"), &[0.0, 1.0], 1, None).await.unwrap();
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    store
        .upsert(&[
            entry("x", "k2", "b.txt", "bib", vec![1.0]),
            entry("y", "k2", "b.txt", "bib", vec![1.0]),
        ])
        .await
        .unwrap();
    let removed = store
        .delete_by_filter(&ns("x"), &SearchFilter::source_path("b.txt"))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store
        .delete_by_filter(&ns("x"), &SearchFilter::default())
        .await
        .is_err());

    let removed = store
        .delete_by_ids(&ns("x"), &[Fingerprint::from_hex("k1")])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.list_ids(&ns("x")).await.unwrap().is_empty());
    assert_eq!(store.list_ids(&ns("y")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_vector_store_update_payloads_changes_only_differing_rows() {
    let (_tmp, pool) = pool().await;
    let store = SqliteVectorStore::new(pool);
    store
        .upsert(&[
            entry("x", "k1", "a.txt", "bib", vec![1.0, 0.0]),
            entry("x", "k2", "a.txt", "bib", vec![0.0, 1.0]),
        ])
        .await
        .unwrap();

    let unchanged = entry("x", "k1", "a.txt", "bib", vec![]).payload;
    let mut moved = entry("x", "k2", "a.txt", "bib", vec![]).payload;
    moved.sequence_index = 0;
    moved.modified_time = None;

    let changed = store
        .update_payloads(
            &ns("x"),
            &[
                (Fingerprint::from_hex("k1"), unchanged),
                (Fingerprint::from_hex("k2"), moved),
                (Fingerprint::from_hex("gone"), entry("x", "gone", "a.txt", "bib", vec![]).payload),
            ],
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let hits = store.query(&ns("x"), &[0.0, 1.0], 1, None).await.unwrap();
    assert_eq!(hits[0].id.as_str(), "k2");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[0].payload.sequence_index, 0);
    assert_eq!(hits[0].payload.modified_time, None);
    assert_eq!(store.list_ids(&ns("x")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_lease_store_claim_renew_release() {
    let (_tmp, pool) = pool().await;
    let leases = SqliteLeaseStore::new(pool);
    let task = ns("task-1");
    let long = Duration::from_secs(60);

    assert!(leases.try_claim(&task, "a", Duration::ZERO).await.unwrap());
    // An expired lease can be taken over.
    assert!(leases.try_claim(&task, "b", long).await.unwrap());
    assert!(!leases.try_claim(&task, "c", long).await.unwrap());
    assert!(leases.try_claim(&task, "b", long).await.unwrap());
    assert!(leases.try_claim(&ns("task-2"), "c", long).await.unwrap());

    assert!(leases.renew(&task, "b", long).await.unwrap());
    assert!(!leases.renew(&task, "a", long).await.unwrap());

    leases.release(&task, "a").await.unwrap();
    assert!(!leases.try_claim(&task, "c", long).await.unwrap());
    leases.release(&task, "b").await.unwrap();
    assert!(leases.try_claim(&task, "c", long).await.unwrap());
}

fn quick_leases(wait: Duration) -> LeaseOptions {
    LeaseOptions {
        ttl: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
        wait_timeout: Some(wait),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lease_excludes_writers_on_separate_pools() {
    let (tmp, first_pool) = pool().await;
    let second_pool = db::connect_path(&tmp.path().join("data/ait.sqlite"))
        .await
        .unwrap();
    let first = NamespaceLocks::with_leases(
        Arc::new(SqliteLeaseStore::new(first_pool)),
        quick_leases(Duration::from_millis(100)),
    );
    let second = NamespaceLocks::with_leases(
        Arc::new(SqliteLeaseStore::new(second_pool)),
        quick_leases(Duration::from_millis(100)),
    );
    let task = ns("task-1");

    let guard = first.acquire(&task).await.unwrap();
    assert!(second.try_acquire(&task).await.unwrap().is_none());
    let err = second.acquire(&task).await.unwrap_err();
    assert!(matches!(err, IndexError::StoreUnavailable(_)));
    assert!(second.try_acquire(&ns("task-2")).await.unwrap().is_some());

    guard.release().await;
    let taken = second.try_acquire(&task).await.unwrap();
    assert!(taken.is_some());
    assert!(first.try_acquire(&task).await.unwrap().is_none());
}

/// One dimension per distinct word length, enough to separate short texts.
struct WordLengthEmbedder;

#[async_trait]
impl Embedder for WordLengthEmbedder {
    fn model_name(&self) -> &str {
        "word-length"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.1f32; 8];
                for word in t.split_whitespace() {
                    v[word.chars().count().min(7)] += 1.0;
                }
                v
            })
            .collect())
    }
}

#[tokio::test]
async fn test_pipeline_over_sqlite() {
    let (_tmp, pool) = pool().await;
    let pipeline = Pipeline::with_embedder(
        pool,
        Arc::new(WordLengthEmbedder),
        IndexerOptions {
            max_chars: 60,
            overlap: 10,
            batch_size: 2,
        },
    );
    let task = ns("qdrant/task-9");

    let docs = vec![
        SourceDocument::new(
            "policy.md",
            "Refunds are issued within thirty days.\n\nShipping is free for members.",
        ),
        SourceDocument::new("notes.txt", "Call the supplier on Monday."),
    ];
    let first = pipeline
        .indexer
        .synchronize(&task, &docs, CleanupMode::Full)
        .await
        .unwrap();
    assert_eq!(first.added, 3);

    let second = pipeline
        .indexer
        .synchronize(&task, &docs, CleanupMode::Full)
        .await
        .unwrap();
    assert_eq!((second.added, second.removed, second.unchanged), (0, 0, 3));

    let matches = pipeline
        .retriever
        .search(&task, "Refunds are issued", 2, None)
        .await
        .unwrap();
    assert!(matches.len() <= 2);
    assert!(!matches.is_empty());

    let removed = pipeline
        .deleter
        .delete(&task, &["policy.md".to_string()])
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let report = pipeline.indexer.verify(&task).await.unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.vectors, 1);
    assert!(report.is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipelines_on_separate_pools_wait_for_each_other() {
    let (tmp, first_pool) = pool().await;
    let second_pool = db::connect_path(&tmp.path().join("data/ait.sqlite"))
        .await
        .unwrap();
    let options = IndexerOptions {
        max_chars: 60,
        overlap: 0,
        batch_size: 4,
    };
    let task = ns("task-7");

    let first = Pipeline::with_options(
        first_pool.clone(),
        Arc::new(WordLengthEmbedder),
        options,
        quick_leases(Duration::from_secs(5)),
    );
    first
        .indexer
        .synchronize(
            &task,
            &[SourceDocument::new("notes.txt", "Call the supplier on Monday.")],
            CleanupMode::Scoped,
        )
        .await
        .unwrap();

    // Another process holds the namespace.
    let holder = NamespaceLocks::with_leases(
        Arc::new(SqliteLeaseStore::new(first_pool)),
        quick_leases(Duration::from_secs(5)),
    );
    let guard = holder.acquire(&task).await.unwrap();

    let second = Arc::new(Pipeline::with_options(
        second_pool,
        Arc::new(WordLengthEmbedder),
        options,
        quick_leases(Duration::from_secs(5)),
    ));
    let delete = {
        let second = second.clone();
        let task = task.clone();
        tokio::spawn(async move {
            second
                .deleter
                .delete(&task, &["notes.txt".to_string()])
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!delete.is_finished());
    assert_eq!(
        SqliteRecordStore::new(second.pool.clone())
            .get_by_namespace(&task)
            .await
            .unwrap()
            .len(),
        1
    );

    guard.release().await;
    assert_eq!(delete.await.unwrap(), 1);
    assert!(second.indexer.verify(&task).await.unwrap().is_clean());
}

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use common::{doc, open, test_config, FakeEmbedder, FAIL_MARKER, SLOW_MARKER, WIDE_MARKER};
use semantic_index::models::ReconcileMode;
use semantic_index::metadata::MetadataStore;
use semantic_index::progress::{NoProgress, ProgressReporter, ReconcileProgress};
use semantic_index::vector::{FlatIndex, VectorBackend};
use semantic_index::IndexError;
use tempfile::TempDir;

#[tokio::test]
async fn first_build_embeds_every_document() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(32);
    let index = open(&config, &embedder);

    let docs = vec![
        doc("a.md", "rust ownership and borrowing"),
        doc("b.md", "python machine learning"),
        doc("c.md", "kubernetes deployment notes"),
    ];
    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.embedded, 3);
    assert_eq!(report.failed(), 0);
    assert_eq!(embedder.calls(), 3);

    let stats = index.stats().await;
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.vectors, 3);
    assert_eq!(stats.dimension, Some(32));
    assert_eq!(stats.model.as_deref(), Some("fake-bow"));
    assert!(config.index.metadata_path().exists());
    assert!(config.index.vectors_path().exists());
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn unchanged_corpus_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(32);
    let index = open(&config, &embedder);

    let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
    index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    let updated = index.stats().await.last_updated;
    let metadata_before = fs::read(config.index.metadata_path()).unwrap();
    embedder.reset();

    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(embedder.calls(), 0);
    assert_eq!(report.unchanged, 2);
    assert!(report.is_noop());
    assert_eq!(index.stats().await.last_updated, updated);
    assert_eq!(fs::read(config.index.metadata_path()).unwrap(), metadata_before);
}

#[tokio::test]
async fn only_changed_documents_are_reembedded() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(32);
    let index = open(&config, &embedder);

    index
        .reconcile(
            &[
                doc("a.md", "first version"),
                doc("b.md", "stays the same"),
                doc("c.md", "going away"),
            ],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();
    let b_before = index.get_document("b.md").await.unwrap();
    embedder.reset();

    let report = index
        .reconcile(
            &[doc("a.md", "second version"), doc("b.md", "stays the same")],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(embedder.calls(), 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.removed, 1);

    assert!(index.get_document("c.md").await.is_none());
    assert_eq!(
        index.get_document("a.md").await.unwrap().content_snapshot,
        "second version"
    );
    assert_eq!(index.get_document("b.md").await.unwrap(), b_before);
    assert_eq!(index.stats().await.vectors, 2);
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn partial_mode_never_removes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    index
        .reconcile(
            &[doc("a.md", "alpha"), doc("b.md", "beta")],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();

    let report = index
        .reconcile(&[doc("c.md", "gamma")], ReconcileMode::Partial, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.removed, 0);
    assert_eq!(report.embedded, 1);
    assert_eq!(index.stats().await.documents, 3);
}

#[tokio::test]
async fn empty_corpus_in_full_mode_clears_the_index() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    let report = index
        .reconcile(&[], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.removed, 1);
    let stats = index.stats().await;
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.vectors, 0);
}

#[tokio::test]
async fn one_failure_does_not_sink_the_batch() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(64);
    let index = open(&config, &embedder);

    let mut docs: Vec<_> = (0..10)
        .map(|i| doc(&format!("doc{i}.md"), &format!("notes on topic{i}")))
        .collect();
    docs[4].content = format!("broken {FAIL_MARKER}");

    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.embedded, 9);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].id, "doc4.md");
    assert!(report.failures[0].reason.contains("injected failure"));

    assert!(index.get_document("doc4.md").await.is_none());
    let hits = index.search("topic7", 3).await.unwrap();
    assert_eq!(hits[0].id, "doc7.md");
    assert!(index.verify().await.is_consistent());

    // The failed document is retried on the next run.
    docs[4].content = "fixed now".to_string();
    embedder.reset();
    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    assert_eq!(embedder.calls(), 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(index.stats().await.documents, 10);
}

#[tokio::test]
async fn slow_embedding_times_out_per_document() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.embed_timeout_secs = 1;
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    let report = index
        .reconcile(
            &[doc("fast.md", "quick"), doc("slow.md", SLOW_MARKER)],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.embedded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "slow.md");
    assert!(report.failures[0].reason.contains("timed out"));
}

#[tokio::test]
async fn provider_width_change_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let small = FakeEmbedder::new(8);
    open(&config, &small)
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let wide = FakeEmbedder::new(16);
    let index = open(&config, &wide);
    let err = index
        .reconcile(&[doc("b.md", "beta")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IndexError::DimensionMismatch {
            expected: 8,
            actual: 16
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(wide.calls(), 0);
    let stats = index.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.dimension, Some(8));
}

#[tokio::test]
async fn wrong_width_vector_aborts_without_partial_writes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(8);
    let index = open(&config, &embedder);

    index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let err = index
        .reconcile(
            &[
                doc("a.md", "alpha"),
                doc("b.md", "beta"),
                doc("c.md", WIDE_MARKER),
            ],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::DimensionMismatch { expected: 8, actual: 9 }));
    // b.md shared the batch with the bad vector and must not have landed.
    assert!(index.get_document("b.md").await.is_none());
    assert_eq!(index.stats().await.vectors, 1);
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn missing_vector_file_is_repaired() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta")];

    open(&config, &embedder)
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    fs::remove_file(config.index.vectors_path()).unwrap();

    let index = open(&config, &embedder);
    let drift = index.verify().await;
    assert_eq!(drift.missing_vectors, vec!["a.md", "b.md"]);

    embedder.reset();
    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.repaired, 2);
    assert_eq!(report.embedded, 2);
    assert_eq!(embedder.calls(), 2);
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn corrupt_metadata_starts_fresh() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);

    open(&config, &embedder)
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    fs::write(config.index.metadata_path(), "{ not json").unwrap();

    let index = open(&config, &embedder);
    assert_eq!(index.stats().await.documents, 0);

    embedder.reset();
    let report = index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.embedded, 1);
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn oversize_documents_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.max_document_bytes = 16;
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    let report = index
        .reconcile(
            &[
                doc("small.md", "tiny"),
                doc("big.md", "this text is well past sixteen bytes"),
            ],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.embedded, 1);
    assert_eq!(embedder.calls(), 1);
    assert!(index.get_document("big.md").await.is_none());
}

#[tokio::test]
async fn duplicate_ids_keep_the_first_copy() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    let report = index
        .reconcile(
            &[doc("a.md", "first"), doc("a.md", "second")],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(embedder.calls(), 1);
    assert_eq!(
        index.get_document("a.md").await.unwrap().content_snapshot,
        "first"
    );
}

#[tokio::test]
async fn snapshots_are_truncated() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.snapshot_max_chars = 5;
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);

    index
        .reconcile(&[doc("a.md", "héllo wörld")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let record = index.get_document("a.md").await.unwrap();
    assert_eq!(record.content_snapshot, "héllo");
    assert_eq!(record.content_hash.len(), 64);
}

#[tokio::test]
async fn reopened_index_sees_persisted_state() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);

    {
        let index = open(&config, &embedder);
        index
            .reconcile(
                &[doc("a.md", "alpha"), doc("b.md", "beta")],
                ReconcileMode::Full,
                &NoProgress,
            )
            .await
            .unwrap();
    }

    let index = open(&config, &embedder);
    let stats = index.stats().await;
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.vectors, 2);
    assert!(stats.metadata_bytes > 0);
    assert!(stats.vectors_bytes > 0);

    embedder.reset();
    let report = index
        .reconcile(
            &[doc("a.md", "alpha"), doc("b.md", "beta")],
            ReconcileMode::Full,
            &NoProgress,
        )
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn width_is_fixed_by_the_first_stored_vector() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let failing = format!("alpha {FAIL_MARKER}");

    let small = FakeEmbedder::new(8);
    let index = open(&config, &small);
    let report = index
        .reconcile(&[doc("a.md", &failing)], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(index.stats().await.dimension, None);
    drop(index);

    let wide = FakeEmbedder::new(16);
    let index = open(&config, &wide);
    let report = index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.embedded, 1);
    let stats = index.stats().await;
    assert_eq!(stats.dimension, Some(16));
    assert_eq!(stats.vectors, 1);
    assert_eq!(index.search("alpha", 1).await.unwrap()[0].id, "a.md");
}

#[tokio::test]
async fn emptied_index_adopts_a_new_width() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());

    let small = FakeEmbedder::new(8);
    let index = open(&config, &small);
    index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    index
        .reconcile(&[], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    drop(index);

    let wide = FakeEmbedder::new(16);
    let index = open(&config, &wide);
    let report = index
        .reconcile(&[doc("b.md", "beta")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.embedded, 1);
    assert_eq!(index.stats().await.dimension, Some(16));
    assert!(index.verify().await.is_consistent());
}

#[tokio::test]
async fn searches_are_served_while_documents_embed() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.embed_timeout_secs = 3;
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);
    index
        .reconcile(&[doc("a.md", "hello world")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let docs = vec![doc("a.md", "hello world"), doc("slow.md", SLOW_MARKER)];
    let reconcile = index.reconcile(&docs, ReconcileMode::Full, &NoProgress);
    let search = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = Instant::now();
        let hits = index.search("hello", 1).await.unwrap();
        (hits, start.elapsed())
    };
    let (report, (hits, waited)) = tokio::join!(reconcile, search);

    let report = report.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "slow.md");
    assert_eq!(hits[0].id, "a.md");
    assert!(waited < Duration::from_secs(1), "search waited {waited:?}");
}

#[tokio::test]
async fn stray_vector_is_reported_skipped_and_repaired() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
    open(&config, &embedder)
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let path = config.index.vectors_path();
    let mut vectors = FlatIndex::load(&path).unwrap();
    vectors.add("ghost.md", &[1.0; 16]).unwrap();
    vectors.save(&path).unwrap();

    let index = open(&config, &embedder);
    assert_eq!(index.verify().await.orphan_vectors, vec!["ghost.md"]);

    let hits = index.search("alpha beta", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.id != "ghost.md"));

    embedder.reset();
    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(embedder.calls(), 0);
    assert!(index.verify().await.is_consistent());
    assert_eq!(index.stats().await.vectors, 2);
}

#[tokio::test]
async fn metadata_from_a_newer_version_is_never_rewritten() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(16);
    let docs = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
    open(&config, &embedder)
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let metadata_path = config.index.metadata_path();
    let vectors_path = config.index.vectors_path();
    let mut json: serde_json::Value =
        serde_json::from_slice(&fs::read(&metadata_path).unwrap()).unwrap();
    json["version"] = serde_json::json!(2);
    json["future_field"] = serde_json::json!({ "kept": true });
    let metadata_bytes = serde_json::to_vec_pretty(&json).unwrap();
    fs::write(&metadata_path, &metadata_bytes).unwrap();
    let vector_bytes = fs::read(&vectors_path).unwrap();

    embedder.reset();
    let index = open(&config, &embedder);
    assert_eq!(index.stats().await.documents, 2);

    let report = index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(embedder.calls(), 0);
    assert_eq!(fs::read(&metadata_path).unwrap(), metadata_bytes);

    let err = index
        .reconcile(&[doc("a.md", "alpha")], ReconcileMode::Full, &NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Configuration(_)));
    assert_eq!(fs::read(&metadata_path).unwrap(), metadata_bytes);
    assert_eq!(fs::read(&vectors_path).unwrap(), vector_bytes);
    assert_eq!(index.stats().await.documents, 2);
}

#[tokio::test]
async fn pruning_many_documents_keeps_lookups_consistent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let embedder = FakeEmbedder::new(64);
    let index = open(&config, &embedder);
    let names = ["apple", "banana", "cherry", "grape", "lemon", "mango"];
    let docs: Vec<_> = names
        .iter()
        .map(|n| doc(&format!("{n}.md"), &format!("about {n}")))
        .collect();
    index
        .reconcile(&docs, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    let kept = vec![docs[1].clone(), docs[4].clone()];
    let report = index
        .reconcile(&kept, ReconcileMode::Full, &NoProgress)
        .await
        .unwrap();

    assert_eq!(report.removed, 4);
    assert_eq!(report.unchanged, 2);
    assert_eq!(index.get_document("lemon.md").await.unwrap().id, "lemon.md");
    assert_eq!(index.get_document("banana.md").await.unwrap().id, "banana.md");
    assert!(index.get_document("mango.md").await.is_none());
    assert!(index.verify().await.is_consistent());
    assert_eq!(index.stats().await.vectors, 2);
}

/// Records how many documents are on disk after each batch.
struct DiskWatcher {
    metadata_path: PathBuf,
    seen: Mutex<Vec<usize>>,
}

impl ProgressReporter for DiskWatcher {
    fn report(&self, event: ReconcileProgress) {
        if let ReconcileProgress::Embedding { .. } = event {
            let on_disk = MetadataStore::load(&self.metadata_path).len();
            self.seen.lock().unwrap().push(on_disk);
        }
    }
}

#[tokio::test]
async fn files_are_written_every_n_batches_and_after_the_last() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.indexing.batch_size = 1;
    config.indexing.persist_every_batches = 2;
    let embedder = FakeEmbedder::new(16);
    let index = open(&config, &embedder);
    let watcher = DiskWatcher {
        metadata_path: config.index.metadata_path(),
        seen: Mutex::new(Vec::new()),
    };

    let docs: Vec<_> = (0..5)
        .map(|i| doc(&format!("d{i}.md"), &format!("note {i}")))
        .collect();
    let report = index
        .reconcile(&docs, ReconcileMode::Full, &watcher)
        .await
        .unwrap();

    assert_eq!(report.embedded, 5);
    assert_eq!(*watcher.seen.lock().unwrap(), vec![0, 2, 2, 4, 5]);
    assert!(index.verify().await.is_consistent());
}

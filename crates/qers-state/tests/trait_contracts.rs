//! Trait contract tests for ReportStore.
//!
//! Every backend runs the same checks. Any conforming implementation must
//! pass these.

use std::sync::Arc;

use qers_state::storage_traits::*;
use qers_state::{FsReportStore, MemoryReportStore, StorageError, SurrealReportStore};
use serde_json::json;

async fn check_round_trip(store: &dyn ReportStore) {
    let doc = json!({
        "batch_id": "batch_rt",
        "status": "completed",
        "per_profile": { "default": { "mean": 1.25, "stdev": null } },
        "values": [0.1, -2.5e-7, 3.0],
    });
    store
        .put(ReportKind::BatchReport, "batch_rt", doc.clone())
        .await
        .unwrap();

    let back = store.get(ReportKind::BatchReport, "batch_rt").await.unwrap();
    assert_eq!(back, doc);
}

async fn check_not_found(store: &dyn ReportStore) {
    let err = store
        .get(ReportKind::BatchEval, "batch_missing")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::NotFound {
            kind: ReportKind::BatchEval,
            ..
        }
    ));
    assert!(!store
        .contains(ReportKind::BatchEval, "batch_missing")
        .await
        .unwrap());
}

async fn check_last_write_wins(store: &dyn ReportStore) {
    store
        .put(ReportKind::JobStatus, "batch_lw", json!({"status": "pending"}))
        .await
        .unwrap();
    store
        .put(ReportKind::JobStatus, "batch_lw", json!({"status": "running"}))
        .await
        .unwrap();

    let got = store.get(ReportKind::JobStatus, "batch_lw").await.unwrap();
    assert_eq!(got["status"], "running");
    assert_eq!(
        store.list_keys(ReportKind::JobStatus).await.unwrap(),
        vec!["batch_lw".to_string()]
    );
}

async fn check_kinds_isolated(store: &dyn ReportStore) {
    store
        .put(ReportKind::BatchReport, "batch_iso", json!({"kind": "report"}))
        .await
        .unwrap();
    store
        .put(ReportKind::BatchEval, "batch_iso", json!({"kind": "eval"}))
        .await
        .unwrap();

    let report = store.get(ReportKind::BatchReport, "batch_iso").await.unwrap();
    let eval = store.get(ReportKind::BatchEval, "batch_iso").await.unwrap();
    assert_eq!(report["kind"], "report");
    assert_eq!(eval["kind"], "eval");
}

async fn check_list_sorted(store: &dyn ReportStore) {
    for key in ["batch_c", "batch_a", "batch_b"] {
        store
            .put(ReportKind::BatchEval, key, json!({ "key": key }))
            .await
            .unwrap();
    }
    let keys = store.list_keys(ReportKind::BatchEval).await.unwrap();
    assert_eq!(keys, vec!["batch_a", "batch_b", "batch_c"]);
}

async fn check_invalid_key(store: &dyn ReportStore) {
    let err = store
        .put(ReportKind::BatchReport, "a/b", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey { .. }));
}

async fn run_contract(store: &dyn ReportStore) {
    check_round_trip(store).await;
    check_not_found(store).await;
    check_last_write_wins(store).await;
    check_kinds_isolated(store).await;
    check_list_sorted(store).await;
    check_invalid_key(store).await;
}

// ===========================================================================
// Backends
// ===========================================================================

#[tokio::test]
async fn memory_store_contract() {
    let store = MemoryReportStore::new();
    run_contract(&store).await;
}

#[tokio::test]
async fn fs_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsReportStore::new(dir.path()).unwrap();
    run_contract(&store).await;
}

#[tokio::test]
async fn surreal_store_contract() {
    let store = SurrealReportStore::in_memory().await.unwrap();
    run_contract(&store).await;
}

// ===========================================================================
// Visibility under concurrency
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_see_partial_documents() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ReportStore> = Arc::new(FsReportStore::new(dir.path()).unwrap());

    let big = |rev: u64| {
        json!({
            "rev": rev,
            "rows": (0..500).map(|i| json!({ "i": i, "rev": rev })).collect::<Vec<_>>(),
        })
    };

    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for rev in 0..20u64 {
                store
                    .put(ReportKind::BatchReport, "batch_cc", big(rev))
                    .await
                    .unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                match store.get(ReportKind::BatchReport, "batch_cc").await {
                    Ok(doc) => {
                        let rev = doc["rev"].as_u64().unwrap();
                        let rows = doc["rows"].as_array().unwrap();
                        assert_eq!(rows.len(), 500);
                        assert!(rows.iter().all(|r| r["rev"].as_u64() == Some(rev)));
                    }
                    Err(e) => assert!(e.is_not_found(), "unexpected error: {e}"),
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for r in readers {
        r.await.unwrap();
    }
}

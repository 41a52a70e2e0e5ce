/// Extraction selector tests against the in-memory store
mod common;

use std::sync::Arc;
use uuid::Uuid;

use common::MemoryStore;
use credit_report_engine::consolidation::{
    DuplicateDetector, ExtractionSelector, MergePolicy, MERGED_METHOD,
};

fn selector(store: &Arc<MemoryStore>) -> ExtractionSelector {
    ExtractionSelector::new(store.clone(), MergePolicy::default())
}

#[tokio::test]
async fn select_best_picks_highest_confidence() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    store.add_attempt(report, "ocr text", 0.55, "ocr");
    store.add_attempt(report, "pdf text", 0.92, "pdf-text");
    store.add_attempt(Uuid::new_v4(), "other report", 0.99, "pdf-text");

    let best = selector(&store).select_best(report).await.unwrap().unwrap();
    assert_eq!(best.text, "pdf text");
    assert_eq!(best.method, "pdf-text");
    assert!((best.confidence - 0.92).abs() < f64::EPSILON);
}

#[tokio::test]
async fn select_best_ties_keep_recorded_order() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    store.add_attempt(report, "first", 0.8, "a");
    store.add_attempt(report, "second", 0.8, "b");

    let best = selector(&store).select_best(report).await.unwrap().unwrap();
    assert_eq!(best.method, "a");
}

#[tokio::test]
async fn no_attempts_means_absent_result_and_empty_merge() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    let selector = selector(&store);

    assert!(selector.select_best(report).await.unwrap().is_none());
    assert_eq!(selector.merge(report).await.unwrap(), "");
    assert!(selector.consolidate_and_persist(report).await.unwrap().is_none());
    assert!(store.state().consolidations.is_empty());
}

#[tokio::test]
async fn consolidate_and_persist_writes_merged_text() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    let base = "AAAA ".repeat(180);
    store.add_attempt(report, &base, 0.9, "pdf-text");
    store.add_attempt(report, "AAAA plus BBBB new info", 0.5, "ocr");
    store.add_attempt(report, &base, 0.2, "ocr-retry");

    let result = selector(&store)
        .consolidate_and_persist(report)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.method, MERGED_METHOD);
    assert!(result.text.ends_with("\n\nAAAA plus BBBB new info"));

    let state = store.state();
    let saved = state.consolidations.get(&report).unwrap();
    assert_eq!(saved.raw_text, result.text);
    assert_eq!(saved.consolidation_status, "merged");
    assert!((saved.consolidation_confidence - 0.9).abs() < f64::EPSILON);
}

#[tokio::test]
async fn long_top_text_is_consolidated_unchanged() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    let long = "line of report text ".repeat(60);
    store.add_attempt(report, &long, 0.7, "pdf-text");
    store.add_attempt(report, "something else entirely", 0.6, "ocr");

    let result = selector(&store)
        .consolidate_and_persist(report)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.text, long);
    assert_eq!(result.method, "pdf-text");
    assert_eq!(
        store.state().consolidations[&report].consolidation_status,
        "consolidated"
    );
}

#[tokio::test]
async fn persist_failure_is_propagated() {
    let store = MemoryStore::new();
    store.failures().save_consolidation = true;

    let err = selector(&store)
        .persist_consolidation(Uuid::new_v4(), "text", 0.5, "consolidated")
        .await
        .unwrap_err();
    assert!(err.is_storage());
}

#[tokio::test]
async fn persisted_confidence_is_clamped() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    selector(&store)
        .persist_consolidation(report, "text", 1.4, "consolidated")
        .await
        .unwrap();
    assert_eq!(store.state().consolidations[&report].consolidation_confidence, 1.0);
}

struct NeverDuplicate;

impl DuplicateDetector for NeverDuplicate {
    fn is_duplicate(&self, _accumulated: &str, _candidate: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn custom_detector_is_used_for_merging() {
    let store = MemoryStore::new();
    let report = Uuid::new_v4();
    store.add_attempt(report, "same", 0.9, "a");
    store.add_attempt(report, "same", 0.8, "b");

    let selector =
        ExtractionSelector::with_detector(store.clone(), MergePolicy::default(), Arc::new(NeverDuplicate));
    assert_eq!(selector.merge(report).await.unwrap(), "same\n\nsame");
}

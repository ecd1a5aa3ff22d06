//! Batch submission: first-failure abort, interruption and echo verification.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{Harness, test_config};
use trsync::Submission;
use trsync::batch::{BatchExecutor, Progress};
use trsync::error::SyncError;
use trsync::transport::mock::MockReply;

// ---------------------------------------------------------------------------
// BatchExecutor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_items_succeed() {
    let executor = BatchExecutor::new(4);
    let report = executor
        .run((1..=10u32).collect(), |n| async move { Ok::<_, SyncError>(n * 10) })
        .await;

    assert!(report.is_success());
    assert!(!report.cancelled);
    let mut results = report.results;
    results.sort();
    assert_eq!(results, (1..=10).map(|n| n * 10).collect::<Vec<_>>());
    assert_eq!(executor.progress().completed(), 10);
}

#[tokio::test]
async fn failure_aborts_and_keeps_earlier_results() {
    let executed = Arc::new(AtomicUsize::new(0));
    let counter = executed.clone();

    let report = BatchExecutor::new(1)
        .run((1..=5u32).collect(), move |n| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if n == 3 {
                    return Err(SyncError::Remote {
                        status: 400,
                        message: "Field :status_id is required".to_string(),
                    });
                }
                Ok(n)
            }
        })
        .await;

    assert_eq!(report.results, vec![1, 2]);
    assert!(report.cancelled);
    let unique: HashSet<_> = report.results.iter().collect();
    assert_eq!(unique.len(), report.results.len(), "no item appears twice");

    match report.error {
        Some(SyncError::BatchAborted { succeeded, cause }) => {
            assert_eq!(succeeded, 2);
            assert!(matches!(*cause, SyncError::Remote { status: 400, .. }));
        }
        other => panic!("expected BatchAborted, got {other:?}"),
    }

    let after_return = executed.load(Ordering::SeqCst);
    assert!(after_return < 5, "item 5 never starts");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executed.load(Ordering::SeqCst), after_return, "nothing runs after return");
}

#[tokio::test]
async fn first_failure_wins() {
    let report = BatchExecutor::new(4)
        .run((1..=4u32).collect(), |n| async move {
            Err::<u32, _>(SyncError::Other(format!("item {n} failed")))
        })
        .await;

    assert!(report.results.is_empty());
    let err = tokio_test::assert_err!(report.into_result());
    assert!(matches!(err, SyncError::BatchAborted { succeeded: 0, .. }));
}

#[tokio::test]
async fn interruption_cancels_outstanding_items() {
    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();

    let report = BatchExecutor::new(1)
        .with_interrupt(interrupt)
        .run((1..=5u32).collect(), move |n| {
            let trigger = trigger.clone();
            async move {
                if n == 2 {
                    trigger.cancel();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, SyncError>(n)
            }
        })
        .await;

    assert_eq!(report.results, vec![1]);
    assert!(report.cancelled);
    let err = report.error.expect("interrupt reported");
    assert!(err.is_interrupted());
    assert!(matches!(err, SyncError::Interrupted));
}

#[tokio::test]
async fn shared_progress_accumulates_across_runs() {
    let progress = Progress::new();
    let executor = BatchExecutor::new(2).with_progress(progress.clone());

    executor
        .run_weighted(vec![5u64, 5], |n| *n, |n| async move { Ok::<_, SyncError>(n) })
        .await;
    executor
        .run_weighted(vec![3u64], |n| *n, |n| async move { Ok::<_, SyncError>(n) })
        .await;

    assert_eq!(progress.completed(), 13);
}

// ---------------------------------------------------------------------------
// SyncEngine::submit_batch
// ---------------------------------------------------------------------------

fn submissions(n: u64) -> Vec<Submission> {
    (1..=n)
        .map(|i| Submission::new(format!("add_result/{i}"), json!({"status_id": 1})))
        .collect()
}

#[tokio::test]
async fn remote_error_aborts_submission() {
    let h = Harness::new();
    for i in 1..=5 {
        let reply = if i == 3 {
            MockReply::json(400, json!({"error": "Field :status_id is required"}))
        } else {
            MockReply::json(200, json!({"id": i, "status_id": 1}))
        };
        h.wire.push_post(&format!("add_result/{i}"), reply.delayed(Duration::from_millis(10)));
    }
    let mut config = test_config();
    config.workers.batch = 1;
    let engine = h.engine(config);

    let report = engine.submit_batch(submissions(5), None).await;

    assert_eq!(report.results.len(), 2);
    let err = report.error.expect("abort error");
    assert!(!err.is_retryable(), "a rejected field will fail again");
    let message = err.to_string();
    assert!(message.contains("aborted after 2 successful item(s)"));
    assert!(message.contains("Field :status_id is required"));
    assert_eq!(h.wire.count_calls("add_result/5"), 0);
    assert_eq!(engine.progress().completed(), 2);
}

#[tokio::test]
async fn abort_on_persistent_server_error_is_retryable() {
    let h = Harness::new();
    h.wire.always("POST add_result/1", MockReply::text(502, "Bad Gateway"));
    let mut config = test_config();
    config.transport.retries = 1;
    let engine = h.engine(config);

    let report = engine.submit_batch(submissions(1), None).await;

    let err = report.error.expect("abort error");
    assert!(matches!(err, SyncError::BatchAborted { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.wire.count_calls("add_result/1"), 2);
}

#[tokio::test]
async fn echo_mismatch_is_a_data_integrity_failure() {
    let h = Harness::new();
    h.wire.push_post("add_case/1", MockReply::json(200, json!({"id": 9, "title": "Other"})));
    let mut config = test_config();
    config.batch.verify = true;
    let engine = h.engine(config);

    let report = engine
        .submit_batch(vec![Submission::new("add_case/1", json!({"title": "Login"}))], None)
        .await;

    match report.error {
        Some(SyncError::BatchAborted { cause, .. }) => {
            assert!(matches!(*cause, SyncError::DataIntegrity { ref path } if path == "add_case/1"));
        }
        other => panic!("expected data integrity abort, got {other:?}"),
    }
}

#[tokio::test]
async fn matching_echo_passes_verification() {
    let h = Harness::new();
    h.wire.push_post(
        "add_results_for_cases/4",
        MockReply::json(200, json!([
            {"id": 1, "case_id": 10, "status_id": 1, "comment": null},
            {"id": 2, "case_id": 11, "status_id": 5, "comment": "boom"},
        ])),
    );
    let mut config = test_config();
    config.batch.verify = true;
    let engine = h.engine(config);

    let items: Vec<Value> = vec![
        json!({"case_id": 10, "status_id": 1, "comment": ""}),
        json!({"case_id": 11, "status_id": 5, "comment": "boom"}),
    ];
    let chunks = Submission::chunked("add_results_for_cases/4", "results", items, 50);
    let report = engine.submit_batch(chunks, None).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(engine.progress().completed(), 2);
}

#[tokio::test]
async fn verification_off_ignores_echo() {
    let h = Harness::new();
    h.wire.push_post("add_case/1", MockReply::json(200, json!({"id": 9})));
    let engine = h.engine(test_config());

    let report = engine
        .submit_batch(vec![Submission::new("add_case/1", json!({"title": "Login"}))], None)
        .await;

    assert!(report.is_success());
}

#[tokio::test]
async fn configured_batch_size_sets_chunk_boundaries() {
    let h = Harness::new();
    h.wire.always("POST add_results_for_cases/4", MockReply::json(200, json!([])));
    let mut config = test_config();
    config.batch.size = 2;
    let engine = h.engine(config);

    let items: Vec<Value> = (10..15).map(|id| json!({"case_id": id, "status_id": 1})).collect();
    let chunks = engine.chunk("add_results_for_cases/4", "results", items);
    let sizes: Vec<u64> = chunks.iter().map(|s| s.units).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let report = engine.submit_batch(chunks, None).await;
    assert!(report.is_success());
    assert_eq!(h.wire.count_calls("add_results_for_cases/4"), 3);
    assert_eq!(engine.progress().completed(), 5);
}

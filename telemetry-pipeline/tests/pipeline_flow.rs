mod common;

use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use telemetry_client::NewRow;
use telemetry_pipeline::{intake, CycleOutcome, MessageQueue};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{pipeline, VISIBILITY};

async fn post(service: telemetry_pipeline::IntakeService, body: &str) -> (StatusCode, Value) {
    let resp = intake::router(service)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn reading(device: &str) -> String {
    json!({
        "deviceCode": device,
        "time": "2024-01-01T00:00:00Z",
        "Level": 1.2,
        "Flow": 3.4,
        "Energy": 5.6
    })
    .to_string()
}

#[tokio::test]
async fn posted_reading_ends_up_as_one_row() {
    let (intake, worker, queue, store) = pipeline();

    let (status, body) = post(intake, &reading("D1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Data received and queued" }));

    let report = worker.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Processed);
    assert_eq!((report.received, report.inserted, report.deleted), (1, 1, 1));

    assert_eq!(
        store.rows(),
        vec![NewRow {
            device_id: "D1".to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            level: 1.2,
            flow: Some(3.4),
            energy: Some(5.6),
        }]
    );
    assert_eq!(queue.deletes(), 1);
    assert_eq!(queue.inner.depth().await, 0);
}

#[tokio::test]
async fn invalid_payloads_get_400_and_nothing_is_queued() {
    let (intake, _worker, queue, _store) = pipeline();

    for body in [
        r#"{"deviceCode":"D1","time":"t","Level":1,"Flow":2}"#,
        r#"{"deviceCode":"D1","time":"","Level":1,"Flow":2,"Energy":3}"#,
        r#"{"deviceCode":"D1","time":"t","Level":1,"Flow":null,"Energy":3}"#,
        r#"{"deviceCode":"D1""#,
    ] {
        let (status, resp) = post(intake.clone(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(resp, json!({ "error": "Invalid payload" }));
    }

    assert_eq!(queue.inner.depth().await, 0);
}

#[tokio::test]
async fn enqueue_failure_gets_500() {
    let (intake, _worker, queue, _store) = pipeline();
    queue.fail_enqueue.store(true, Ordering::SeqCst);

    let (status, body) = post(intake, &reading("D1")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to queue message" }));
    assert_eq!(queue.inner.depth().await, 0);
}

#[tokio::test]
async fn malformed_message_is_dropped_once() {
    let (_intake, worker, queue, store) = pipeline();
    queue
        .enqueue(r#"{"schemaVersion":2,"deviceCode":"D1","time":"t","Level":1,"Flow":2}"#)
        .await
        .unwrap();

    let report = worker.run_cycle().await;

    assert_eq!((report.dropped, report.deleted, report.inserted), (1, 1, 0));
    assert!(store.rows().is_empty());
    assert_eq!(queue.deletes(), 1);
    assert_eq!(queue.inner.depth().await, 0);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_keeps_message_until_it_succeeds() {
    let (intake, worker, queue, store) = pipeline();
    intake.submit_reading(serde_json::from_str(&reading("D1")).unwrap()).await.unwrap();

    store.fail_inserts.store(true, Ordering::SeqCst);
    let report = worker.run_cycle().await;
    assert_eq!((report.failed, report.deleted), (1, 0));
    assert_eq!(queue.deletes(), 0);
    assert_eq!(queue.inner.depth().await, 1);

    // Still invisible: nothing to do.
    store.fail_inserts.store(false, Ordering::SeqCst);
    let report = worker.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::NoMessages);

    tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
    let report = worker.run_cycle().await;

    assert_eq!((report.inserted, report.deleted), (1, 1));
    assert_eq!(store.rows().len(), 1);
    assert_eq!(queue.inner.depth().await, 0);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_message_is_redelivered() {
    let (intake, _worker, queue, _store) = pipeline();
    intake.submit_reading(serde_json::from_str(&reading("D1")).unwrap()).await.unwrap();

    let first = queue.receive(10, Duration::ZERO).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::advance(VISIBILITY + Duration::from_secs(1)).await;
    let again = queue.receive(10, Duration::ZERO).await.unwrap();

    assert_eq!(again.len(), 1);
    assert_eq!(again[0].body, first[0].body);
    assert_eq!(again[0].delivery_count, 2);
}

#[tokio::test]
async fn one_failed_insert_does_not_stop_the_batch() {
    let (intake, worker, queue, store) = pipeline();
    for device in ["D1", "D2", "D3"] {
        intake.submit_reading(serde_json::from_str(&reading(device)).unwrap()).await.unwrap();
    }
    *store.fail_device.lock().unwrap() = Some("D2".to_string());

    let report = worker.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Processed);
    assert_eq!((report.received, report.inserted, report.failed, report.deleted), (3, 2, 1, 2));

    let devices: Vec<_> = store.rows().into_iter().map(|r| r.device_id).collect();
    assert_eq!(devices, vec!["D1", "D3"]);
    assert_eq!(queue.inner.depth().await, 1);
    assert_eq!(queue.inner.in_flight().await, 1);
}

#[tokio::test]
async fn table_creation_failure_does_not_block_inserts() {
    let (intake, worker, _queue, store) = pipeline();
    store.fail_schema.store(true, Ordering::SeqCst);
    intake.submit_reading(serde_json::from_str(&reading("D1")).unwrap()).await.unwrap();

    let report = worker.run_cycle().await;
    worker.run_cycle().await;

    assert_eq!(report.inserted, 1);
    assert_eq!(store.rows().len(), 1);
    assert_eq!(store.schema_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn receive_failure_ends_cycle_without_side_effects() {
    let (intake, worker, queue, store) = pipeline();
    intake.submit_reading(serde_json::from_str(&reading("D1")).unwrap()).await.unwrap();
    queue.fail_receive.store(true, Ordering::SeqCst);

    let report = worker.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::Aborted(_)));
    assert!(store.rows().is_empty());

    queue.fail_receive.store(false, Ordering::SeqCst);
    let report = worker.run_cycle().await;
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn delete_failure_ends_cycle_after_the_insert() {
    let (intake, worker, queue, store) = pipeline();
    for device in ["D1", "D2"] {
        intake.submit_reading(serde_json::from_str(&reading(device)).unwrap()).await.unwrap();
    }
    queue.fail_delete.store(true, Ordering::SeqCst);

    let report = worker.run_cycle().await;

    assert!(matches!(report.outcome, CycleOutcome::Aborted(_)));
    assert_eq!((report.received, report.inserted, report.deleted), (2, 1, 0));
    assert_eq!(store.rows().len(), 1);
    assert_eq!(queue.inner.depth().await, 2);
}

#[tokio::test]
async fn legacy_and_untagged_messages_are_stored() {
    let (_intake, worker, queue, store) = pipeline();
    queue
        .enqueue(r#"{"schemaVersion":1,"deviceId":"OLD","timestamp":"2023-05-01T10:00:00Z","level":0}"#)
        .await
        .unwrap();
    queue
        .enqueue(r#"{"deviceCode":"NEW","time":"2024-02-01T00:00:00Z","Level":2,"Flow":0,"Energy":7}"#)
        .await
        .unwrap();

    let report = worker.run_cycle().await;
    assert_eq!(report.inserted, 2);

    let rows = store.rows();
    assert_eq!(rows[0].device_id, "OLD");
    assert_eq!(rows[0].level, 0.0);
    assert_eq!((rows[0].flow, rows[0].energy), (None, None));
    assert_eq!(rows[1].device_id, "NEW");
    assert_eq!((rows[1].flow, rows[1].energy), (Some(0.0), Some(7.0)));
}

#[tokio::test(start_paused = true)]
async fn run_loop_processes_until_cancelled() {
    let (intake, worker, queue, store) = pipeline();
    let worker = Arc::new(worker);
    let token = CancellationToken::new();

    let handle = {
        let worker = worker.clone();
        let token = token.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    intake.submit_reading(serde_json::from_str(&reading("D1")).unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(store.rows().len(), 1);

    intake.submit_reading(serde_json::from_str(&reading("D2")).unwrap()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(store.rows().len(), 2);

    token.cancel();
    handle.await.unwrap();
    assert_eq!(queue.inner.depth().await, 0);
}

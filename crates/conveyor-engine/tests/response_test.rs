// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Response processor tests over the in-memory backends.

use std::sync::Arc;

use chrono::{Duration, Utc};
use conveyor_core::events::{
    DeadLetterEvent, NotificationLevel, SubmissionStatus, WorkerOutcome, WorkerResponseEvent,
};
use conveyor_core::request::{ErrorType, NewRequest, PendingStep, RequestState};
use conveyor_core::store::{MemoryRequestStore, RequestStore};
use conveyor_engine::publisher::RecordingPublisher;
use conveyor_engine::response::ResponseProcessor;
use uuid::Uuid;

struct Fixture {
    store: Arc<MemoryRequestStore>,
    publisher: Arc<RecordingPublisher>,
    processor: ResponseProcessor,
}

fn fixture_with_done_notify(notify_on_done: bool) -> Fixture {
    let store = Arc::new(MemoryRequestStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let processor = ResponseProcessor::new(store.clone(), publisher.clone(), notify_on_done);
    Fixture {
        store,
        publisher,
        processor,
    }
}

fn fixture() -> Fixture {
    fixture_with_done_notify(false)
}

async fn seed(store: &MemoryRequestStore, correlation_id: &str, state: RequestState) -> Uuid {
    let inserted = store
        .insert_batch(vec![NewRequest {
            correlation_id: correlation_id.to_string(),
            tenant: "tenant-a".to_string(),
            owner: "user".to_string(),
            session: "user-20250101".to_string(),
            target: "DATA".to_string(),
            payload: serde_json::json!({}),
            state: RequestState::Granted,
            priority: 0,
            expiry_date: Utc::now() + Duration::hours(24),
        }])
        .await
        .unwrap();
    let id = inserted[0].id;
    if state != RequestState::Granted {
        store
            .bulk_update_state("tenant-a", &[id], state, None, Utc::now())
            .await
            .unwrap();
    }
    id
}

fn success(request_id: &str, step: PendingStep) -> WorkerResponseEvent {
    WorkerResponseEvent {
        request_id: request_id.to_string(),
        outcome: WorkerOutcome::Success,
        step: Some(step),
        job_id: None,
        messages: vec![],
    }
}

fn outcome(request_id: &str, outcome: WorkerOutcome, messages: Vec<String>) -> WorkerResponseEvent {
    WorkerResponseEvent {
        request_id: request_id.to_string(),
        outcome,
        step: None,
        job_id: None,
        messages,
    }
}

#[tokio::test]
async fn test_granted_ack_links_job_and_enters_first_step() {
    let f = fixture();
    seed(&f.store, "corr-1", RequestState::Granted).await;
    let job = Uuid::new_v4();

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![WorkerResponseEvent {
                request_id: "corr-1".to_string(),
                outcome: WorkerOutcome::Granted,
                step: None,
                job_id: Some(job),
                messages: vec![],
            }],
        )
        .await
        .unwrap();

    assert_eq!(summary.linked, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(
        stored.state,
        RequestState::Pending(PendingStep::GenerationPending)
    );
    assert_eq!(stored.linked_job_id, Some(job));

    // A second ack is stale: the request is already past GRANTED.
    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![WorkerResponseEvent {
                request_id: "corr-1".to_string(),
                outcome: WorkerOutcome::Granted,
                step: None,
                job_id: Some(Uuid::new_v4()),
                messages: vec![],
            }],
        )
        .await
        .unwrap();
    assert_eq!(summary.dropped_stale, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.linked_job_id, Some(job));
}

#[tokio::test]
async fn test_success_advances_current_step_and_drops_duplicate() {
    // A success for the request's current step advances it exactly one step.
    let f = fixture();
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![success("corr-1", PendingStep::GenerationPending)],
        )
        .await
        .unwrap();
    assert_eq!(summary.advanced, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Pending(PendingStep::Generated));

    // The same success arriving again later is stale and changes nothing.
    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![success("corr-1", PendingStep::GenerationPending)],
        )
        .await
        .unwrap();
    assert_eq!(summary.dropped_stale, 1);
    assert_eq!(summary.advanced, 0);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Pending(PendingStep::Generated));
}

#[tokio::test]
async fn test_success_on_last_step_completes_without_notification() {
    let f = fixture();
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::IngestPending),
    )
    .await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![success("corr-1", PendingStep::IngestPending)],
        )
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Done);

    // Completion surfaces to the caller but does not notify by default.
    let responses = f.publisher.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1.status, SubmissionStatus::Success);
    assert!(f.publisher.notifications().is_empty());
}

#[tokio::test]
async fn test_done_notification_when_configured() {
    let f = fixture_with_done_notify(true);
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::IngestPending),
    )
    .await;

    f.processor
        .process_batch(
            "tenant-a",
            vec![success("corr-1", PendingStep::IngestPending)],
        )
        .await
        .unwrap();

    let notifications = f.publisher.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].1.level, NotificationLevel::Info);
}

#[tokio::test]
async fn test_error_outcome_joins_cause_and_notifies() {
    let f = fixture();
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![outcome(
                "corr-1",
                WorkerOutcome::Error,
                vec!["disk full".to_string(), "retry exhausted".to_string()],
            )],
        )
        .await
        .unwrap();

    assert_eq!(summary.errored, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Error);
    assert_eq!(stored.error_type, Some(ErrorType::Internal));
    assert_eq!(
        stored.error_cause.as_deref(),
        Some("disk full, retry exhausted")
    );

    let notifications = f.publisher.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].1.level, NotificationLevel::Error);
    assert_eq!(notifications[0].1.owner, "user");

    let responses = f.publisher.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1.status, SubmissionStatus::Error);
    assert_eq!(responses[0].1.error_type, Some(ErrorType::Internal));
}

#[tokio::test]
async fn test_invalid_and_skipped_outcomes_map_to_error_taxonomy() {
    let f = fixture();
    seed(
        &f.store,
        "corr-invalid",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;
    seed(
        &f.store,
        "corr-skipped",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;

    f.processor
        .process_batch(
            "tenant-a",
            vec![
                outcome("corr-invalid", WorkerOutcome::InvalidContent, vec![]),
                outcome("corr-skipped", WorkerOutcome::Skipped, vec![]),
            ],
        )
        .await
        .unwrap();

    let invalid = f.store.get("tenant-a", "corr-invalid").await.unwrap().unwrap();
    assert_eq!(invalid.error_type, Some(ErrorType::InvalidContent));

    // Skipped collapses into INTERNAL with its own message.
    let skipped = f.store.get("tenant-a", "corr-skipped").await.unwrap().unwrap();
    assert_eq!(skipped.error_type, Some(ErrorType::Internal));
    assert!(skipped.error_cause.unwrap().contains("skipped"));
}

#[tokio::test]
async fn test_delayed_outcome_is_ignored() {
    let f = fixture();
    seed(&f.store, "corr-1", RequestState::Granted).await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![outcome("corr-1", WorkerOutcome::Delayed, vec![])],
        )
        .await
        .unwrap();

    assert_eq!(summary.ignored, 1);
    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Granted);
    assert!(f.publisher.responses().is_empty());
}

#[tokio::test]
async fn test_terminal_and_unknown_requests_dropped_without_side_effects() {
    let f = fixture();
    seed(&f.store, "corr-done", RequestState::Done).await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![
                success("corr-done", PendingStep::IngestPending),
                success("corr-missing", PendingStep::GenerationPending),
            ],
        )
        .await
        .unwrap();

    assert_eq!(summary.dropped_stale, 1);
    assert_eq!(summary.dropped_unknown, 1);
    // No state change and no duplicate notification for the finished request.
    let stored = f.store.get("tenant-a", "corr-done").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Done);
    assert!(f.publisher.notifications().is_empty());
    assert!(f.publisher.responses().is_empty());
}

#[tokio::test]
async fn test_error_wins_within_one_batch() {
    // Mixed batch for one request: an error between two successes must leave
    // the request in ERROR, later successes dropped as stale.
    let f = fixture();
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;

    let summary = f
        .processor
        .process_batch(
            "tenant-a",
            vec![
                success("corr-1", PendingStep::GenerationPending),
                outcome(
                    "corr-1",
                    WorkerOutcome::Error,
                    vec!["Error message".to_string()],
                ),
                success("corr-1", PendingStep::Generated),
            ],
        )
        .await
        .unwrap();

    assert_eq!(summary.advanced, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.dropped_stale, 1);

    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Error);
    assert_eq!(stored.error_cause.as_deref(), Some("Error message"));
    // Exactly one failure notification.
    assert_eq!(f.publisher.notifications().len(), 1);
}

#[tokio::test]
async fn test_dead_letters_force_fail_live_requests() {
    let f = fixture();
    seed(
        &f.store,
        "corr-1",
        RequestState::Pending(PendingStep::GenerationPending),
    )
    .await;
    seed(&f.store, "corr-done", RequestState::Done).await;

    let summary = f
        .processor
        .process_dead_letters(
            "tenant-a",
            vec![
                DeadLetterEvent {
                    request_id: "corr-1".to_string(),
                    error: "worker crashed: OOM".to_string(),
                },
                DeadLetterEvent {
                    request_id: "corr-done".to_string(),
                    error: "late crash report".to_string(),
                },
            ],
        )
        .await
        .unwrap();

    assert_eq!(summary.errored, 1);
    assert_eq!(summary.dropped_stale, 1);

    let stored = f.store.get("tenant-a", "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.state, RequestState::Error);
    assert_eq!(stored.error_type, Some(ErrorType::Internal));
    assert_eq!(stored.error_cause.as_deref(), Some("worker crashed: OOM"));
    // The finished request is untouched and not re-notified.
    assert_eq!(f.publisher.notifications().len(), 1);
}

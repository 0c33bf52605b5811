// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire-level event types.
//!
//! These are the message payloads crossing the engine's boundaries: intake
//! events arriving in batches, per-input submission responses going back to
//! callers, derived work events consumed by external workers, worker
//! responses coming back, and the advisory stop-job signal. Transport wiring
//! (queues, exchanges) is the embedding application's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::{ErrorType, PendingStep, Request, RequestState};

// ============================================================================
// Intake
// ============================================================================

/// One inbound submission in an intake batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeEvent {
    /// Caller-assigned key, unique per tenant across the request's lifetime.
    pub correlation_id: String,
    /// Tenant the submission belongs to.
    pub tenant: String,
    /// Submitting principal.
    pub owner: String,
    /// Target model/type the payload is intended for.
    pub target: String,
    /// Opaque submission payload.
    pub payload: serde_json::Value,
    /// Requested time-to-live in seconds; the configured default applies when
    /// absent.
    pub ttl_seconds: Option<i64>,
    /// Traceability tag; defaulted from the owner and the current date when
    /// absent.
    pub session: Option<String>,
    /// Scheduling tie-break, lower first; defaults to 0.
    pub priority: Option<i16>,
}

// ============================================================================
// Submission responses
// ============================================================================

/// Outcome reported back to the caller for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    /// Registered and queued for processing.
    Granted,
    /// Rejected at intake; terminal.
    Denied,
    /// Completed successfully; terminal.
    Success,
    /// Failed downstream or expired; terminal.
    Error,
}

/// Per-input response emitted by the intake and response processors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponseEvent {
    /// Correlation id of the request this response is about.
    pub correlation_id: String,
    /// Outcome class.
    pub status: SubmissionStatus,
    /// Error taxonomy class, present on `Denied` and `Error`.
    pub error_type: Option<ErrorType>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Expiry granted to the request, present on `Granted`.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Id of the persisted request, when one exists.
    pub derived_id: Option<Uuid>,
}

impl SubmissionResponseEvent {
    /// Response for a newly granted request.
    pub fn granted(request: &Request, message: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            status: SubmissionStatus::Granted,
            error_type: None,
            message: Some(message.into()),
            expiry_date: Some(request.expiry_date),
            derived_id: Some(request.id),
        }
    }

    /// Response for a submission rejected at intake. Nothing is persisted.
    pub fn denied(
        correlation_id: impl Into<String>,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: SubmissionStatus::Denied,
            error_type: Some(error_type),
            message: Some(message.into()),
            expiry_date: None,
            derived_id: None,
        }
    }

    /// Response replaying the outcome of an already-stored request
    /// (idempotent re-delivery of a known correlation id).
    pub fn from_state(request: &Request, message: impl Into<String>) -> Self {
        let status = match request.state {
            RequestState::Done => SubmissionStatus::Success,
            RequestState::Error => SubmissionStatus::Error,
            RequestState::Denied => SubmissionStatus::Denied,
            // Still in flight: the original grant stands.
            _ => SubmissionStatus::Granted,
        };
        Self {
            correlation_id: request.correlation_id.clone(),
            status,
            error_type: request.error_type,
            message: Some(message.into()),
            expiry_date: Some(request.expiry_date),
            derived_id: Some(request.id),
        }
    }

    /// Response for a request that reached a terminal state asynchronously.
    pub fn terminal(request: &Request, message: impl Into<String>) -> Self {
        Self::from_state(request, message)
    }
}

// ============================================================================
// Derived work
// ============================================================================

/// Work event describing the downstream action for one granted request,
/// consumed by an external worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequestEvent {
    /// Correlation id of the originating request.
    pub correlation_id: String,
    /// Tenant of the originating request.
    pub tenant: String,
    /// Owner of the originating request.
    pub owner: String,
    /// Session tag for traceability.
    pub session: String,
    /// Storage backend the worker writes to.
    pub storage_target: String,
    /// Model the payload maps onto.
    pub model: String,
    /// Reference to the persisted payload (the request id); workers fetch the
    /// payload by this reference rather than receiving it inline.
    pub payload_ref: String,
}

// ============================================================================
// Worker responses
// ============================================================================

/// Outcome reported by a downstream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerOutcome {
    /// Worker accepted the work; the request enters its first pending step.
    Granted,
    /// Current step finished; the request advances one step.
    Success,
    /// Worker failed.
    Error,
    /// Worker rejected the content.
    InvalidContent,
    /// Worker skipped the work.
    Skipped,
    /// Worker deferred the work; intentionally not processed.
    Delayed,
}

/// One downstream completion/error event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponseEvent {
    /// Correlation id header identifying the request.
    pub request_id: String,
    /// Reported outcome.
    pub outcome: WorkerOutcome,
    /// Step the outcome refers to; required for `Success` to match the
    /// request's current step.
    pub step: Option<PendingStep>,
    /// Job the worker runs the request under, reported with `Granted`.
    pub job_id: Option<Uuid>,
    /// Messages joined into the error cause on failure outcomes.
    pub messages: Vec<String>,
}

/// Unhandled worker failure surfaced through the dead-letter path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// Correlation id header of the failed request.
    pub request_id: String,
    /// Raw error detail, typically a stack trace.
    pub error: String,
}

// ============================================================================
// Cascading signals and notifications
// ============================================================================

/// Advisory request to stop a running job. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopJobSignal {
    /// Job to stop.
    pub job_id: Uuid,
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// Informational, e.g. a configured completion notice.
    Info,
    /// Terminal failure.
    Error,
}

/// User-facing notification summarizing a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Correlation id of the request the notification is about.
    pub correlation_id: String,
    /// Recipient principal.
    pub owner: String,
    /// Short subject line.
    pub title: String,
    /// Human-readable detail.
    pub message: String,
    /// Severity.
    pub level: NotificationLevel,
}

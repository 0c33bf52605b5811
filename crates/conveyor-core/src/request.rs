// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request entity and lifecycle state machine.
//!
//! A [`Request`] tracks one tenant-scoped submission from intake to a terminal
//! state. State transitions are monotonic: once a request reaches `DONE`,
//! `DENIED` or `ERROR` no event moves it again, and a pending step can only be
//! advanced by a response that names the request's *current* step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for the stored error cause. Longer causes are truncated, never
/// rejected.
pub const MAX_ERROR_CAUSE_LEN: usize = 512;

// ============================================================================
// Pending steps
// ============================================================================

/// Named sub-steps of the `PENDING` lifecycle state, in processing order.
///
/// A success response advances the request one step at a time; a response for
/// any other step is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingStep {
    /// Derived work accepted by a worker, output generation in progress.
    GenerationPending,
    /// Output generated, waiting for the ingest chain to pick it up.
    Generated,
    /// Ingest submitted, waiting for final confirmation.
    IngestPending,
}

impl PendingStep {
    /// The step following this one, or `None` when this is the last step
    /// (a success there completes the request).
    pub fn next(self) -> Option<PendingStep> {
        match self {
            PendingStep::GenerationPending => Some(PendingStep::Generated),
            PendingStep::Generated => Some(PendingStep::IngestPending),
            PendingStep::IngestPending => None,
        }
    }

    /// Stable string code used in storage and on the wire.
    pub fn code(self) -> &'static str {
        match self {
            PendingStep::GenerationPending => "GENERATION_PENDING",
            PendingStep::Generated => "GENERATED",
            PendingStep::IngestPending => "INGEST_PENDING",
        }
    }

    /// Parse a step from its string code.
    pub fn parse(code: &str) -> Option<PendingStep> {
        match code {
            "GENERATION_PENDING" => Some(PendingStep::GenerationPending),
            "GENERATED" => Some(PendingStep::Generated),
            "INGEST_PENDING" => Some(PendingStep::IngestPending),
            _ => None,
        }
    }

    /// First step entered when a granted request is acknowledged by a worker.
    pub fn first() -> PendingStep {
        PendingStep::GenerationPending
    }
}

// ============================================================================
// Lifecycle states
// ============================================================================

/// Lifecycle state of a [`Request`].
///
/// ```text
/// RECEIVED ──grant──► GRANTED ──ack──► PENDING(step…) ──success──► DONE
///     │                  │                   │
///   deny              expire            error/expire
///     ▼                  ▼                   ▼
///  DENIED              ERROR               ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Seen at intake, not yet validated. Never persisted.
    Received,
    /// Validated and persisted; derived work emitted but not yet acknowledged.
    Granted,
    /// Worker acknowledged; progressing through the named steps.
    Pending(PendingStep),
    /// All steps completed successfully. Terminal.
    Done,
    /// Rejected at intake. Terminal, never persisted.
    Denied,
    /// Failed downstream or expired. Terminal.
    Error,
}

impl RequestState {
    /// True for `DONE`, `DENIED` and `ERROR`: no event changes the state again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Done | RequestState::Denied | RequestState::Error
        )
    }

    /// The non-terminal states a stored request can be found in, i.e. the
    /// states still eligible for updates from responses or sweeps.
    pub fn active() -> &'static [RequestState] {
        &[
            RequestState::Granted,
            RequestState::Pending(PendingStep::GenerationPending),
            RequestState::Pending(PendingStep::Generated),
            RequestState::Pending(PendingStep::IngestPending),
        ]
    }

    /// State reached by a success response reporting `step`, or `None` when
    /// the response is stale (not pending, or pending a different step).
    pub fn next_on_success(self, step: PendingStep) -> Option<RequestState> {
        match self {
            RequestState::Pending(current) if current == step => Some(
                current
                    .next()
                    .map(RequestState::Pending)
                    .unwrap_or(RequestState::Done),
            ),
            _ => None,
        }
    }

    /// Stable string code used in storage and on the wire.
    pub fn code(self) -> &'static str {
        match self {
            RequestState::Received => "RECEIVED",
            RequestState::Granted => "GRANTED",
            RequestState::Pending(step) => step.code(),
            RequestState::Done => "DONE",
            RequestState::Denied => "DENIED",
            RequestState::Error => "ERROR",
        }
    }

    /// Parse a state from its string code.
    pub fn parse(code: &str) -> Option<RequestState> {
        match code {
            "RECEIVED" => Some(RequestState::Received),
            "GRANTED" => Some(RequestState::Granted),
            "DONE" => Some(RequestState::Done),
            "DENIED" => Some(RequestState::Denied),
            "ERROR" => Some(RequestState::Error),
            other => PendingStep::parse(other).map(RequestState::Pending),
        }
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Why a request reached `DENIED` or `ERROR`.
///
/// The four classes let operators distinguish intake rejections
/// (`Forbidden`, `InvalidContent`), nobody-ever-finished-it (`Expired`) and
/// downstream failures (`Internal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Submitting principal could not be resolved.
    Forbidden,
    /// Payload malformed, oversized or targeting an unknown model.
    InvalidContent,
    /// Passed its expiry date before completing.
    Expired,
    /// Downstream worker reported a failure.
    Internal,
}

impl ErrorType {
    /// Stable string code used in storage and on the wire.
    pub fn code(self) -> &'static str {
        match self {
            ErrorType::Forbidden => "FORBIDDEN",
            ErrorType::InvalidContent => "INVALID_CONTENT",
            ErrorType::Expired => "EXPIRED",
            ErrorType::Internal => "INTERNAL",
        }
    }

    /// Parse an error type from its string code.
    pub fn parse(code: &str) -> Option<ErrorType> {
        match code {
            "FORBIDDEN" => Some(ErrorType::Forbidden),
            "INVALID_CONTENT" => Some(ErrorType::InvalidContent),
            "EXPIRED" => Some(ErrorType::Expired),
            "INTERNAL" => Some(ErrorType::Internal),
            _ => None,
        }
    }
}

/// Truncate an error cause to `MAX_ERROR_CAUSE_LEN`, respecting char
/// boundaries. Overflow is never an error.
pub fn truncate_cause(cause: &str) -> String {
    if cause.len() <= MAX_ERROR_CAUSE_LEN {
        return cause.to_string();
    }
    let mut end = MAX_ERROR_CAUSE_LEN;
    while !cause.is_char_boundary(end) {
        end -= 1;
    }
    cause[..end].to_string()
}

// ============================================================================
// Request entity
// ============================================================================

/// A persisted submission request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Internal identifier, assigned at persistence time. Immutable.
    pub id: Uuid,
    /// Caller-supplied key, unique within a tenant. Matches asynchronous
    /// responses back to this request.
    pub correlation_id: String,
    /// Isolation boundary; every query and lock is scoped to one tenant.
    pub tenant: String,
    /// Identity of the submitting principal.
    pub owner: String,
    /// Traceability tag grouping related submissions.
    pub session: String,
    /// Declared target model/type, validated at intake.
    pub target: String,
    /// Opaque submission payload.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub state: RequestState,
    /// Scheduling tie-break, lower value first.
    pub priority: i16,
    /// Reference (not ownership) to the job performing the heavy-lift work.
    pub linked_job_id: Option<Uuid>,
    /// Populated only in terminal error states.
    pub error_type: Option<ErrorType>,
    /// Human-readable cause, bounded by [`MAX_ERROR_CAUSE_LEN`].
    pub error_cause: Option<String>,
    /// When the request was first persisted.
    pub created_at: DateTime<Utc>,
    /// Last state or linkage change.
    pub updated_at: DateTime<Utc>,
    /// Computed at grant time from the TTL; recomputed only by an explicit
    /// administrative update, never by lifecycle events.
    pub expiry_date: DateTime<Utc>,
}

impl Request {
    /// True once the request reached `DONE`, `DENIED` or `ERROR`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A request not yet persisted. The store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Caller-supplied key, unique within a tenant.
    pub correlation_id: String,
    /// Isolation boundary.
    pub tenant: String,
    /// Identity of the submitting principal.
    pub owner: String,
    /// Traceability tag.
    pub session: String,
    /// Declared target model/type.
    pub target: String,
    /// Opaque submission payload.
    pub payload: serde_json::Value,
    /// Initial lifecycle state; `GRANTED` for the intake path.
    pub state: RequestState,
    /// Scheduling tie-break, lower value first.
    pub priority: i16,
    /// When the request stops being eligible for processing.
    pub expiry_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order() {
        assert_eq!(
            PendingStep::GenerationPending.next(),
            Some(PendingStep::Generated)
        );
        assert_eq!(PendingStep::Generated.next(), Some(PendingStep::IngestPending));
        assert_eq!(PendingStep::IngestPending.next(), None);
        assert_eq!(PendingStep::first(), PendingStep::GenerationPending);
    }

    #[test]
    fn test_state_codes_round_trip() {
        let states = [
            RequestState::Received,
            RequestState::Granted,
            RequestState::Pending(PendingStep::GenerationPending),
            RequestState::Pending(PendingStep::Generated),
            RequestState::Pending(PendingStep::IngestPending),
            RequestState::Done,
            RequestState::Denied,
            RequestState::Error,
        ];
        for state in states {
            assert_eq!(RequestState::parse(state.code()), Some(state));
        }
        assert_eq!(RequestState::parse("BOGUS"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Done.is_terminal());
        assert!(RequestState::Denied.is_terminal());
        assert!(RequestState::Error.is_terminal());
        assert!(!RequestState::Granted.is_terminal());
        assert!(!RequestState::Pending(PendingStep::Generated).is_terminal());
        for state in RequestState::active() {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_success_advances_current_step_only() {
        let pending = RequestState::Pending(PendingStep::GenerationPending);
        assert_eq!(
            pending.next_on_success(PendingStep::GenerationPending),
            Some(RequestState::Pending(PendingStep::Generated))
        );
        // A response for a different step is stale.
        assert_eq!(pending.next_on_success(PendingStep::Generated), None);
        assert_eq!(pending.next_on_success(PendingStep::IngestPending), None);
    }

    #[test]
    fn test_success_on_last_step_completes() {
        let pending = RequestState::Pending(PendingStep::IngestPending);
        assert_eq!(
            pending.next_on_success(PendingStep::IngestPending),
            Some(RequestState::Done)
        );
    }

    #[test]
    fn test_success_ignored_outside_pending() {
        assert_eq!(
            RequestState::Granted.next_on_success(PendingStep::GenerationPending),
            None
        );
        assert_eq!(
            RequestState::Done.next_on_success(PendingStep::IngestPending),
            None
        );
        assert_eq!(
            RequestState::Error.next_on_success(PendingStep::GenerationPending),
            None
        );
    }

    #[test]
    fn test_error_type_codes() {
        for error_type in [
            ErrorType::Forbidden,
            ErrorType::InvalidContent,
            ErrorType::Expired,
            ErrorType::Internal,
        ] {
            assert_eq!(ErrorType::parse(error_type.code()), Some(error_type));
        }
        assert_eq!(ErrorType::parse("OTHER"), None);
    }

    #[test]
    fn test_truncate_cause_short_untouched() {
        assert_eq!(truncate_cause("boom"), "boom");
    }

    #[test]
    fn test_truncate_cause_bounds_long_input() {
        let long = "x".repeat(MAX_ERROR_CAUSE_LEN * 2);
        let truncated = truncate_cause(&long);
        assert_eq!(truncated.len(), MAX_ERROR_CAUSE_LEN);
    }

    #[test]
    fn test_truncate_cause_respects_char_boundary() {
        // Multi-byte char straddling the boundary must not split.
        let mut long = "a".repeat(MAX_ERROR_CAUSE_LEN - 1);
        long.push_str("éé");
        let truncated = truncate_cause(&long);
        assert!(truncated.len() <= MAX_ERROR_CAUSE_LEN);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker response processing.
//!
//! Consumes batches of downstream completion/error events and reconciles the
//! matching requests' state. Matching is state-filtered rather than ordered:
//! an event referencing a terminal request, an unknown id, or a step other
//! than the request's current one is dropped and counted, never retried.
//! Within one batch the first terminal outcome for a request wins; later
//! events for the same request fall out as stale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use conveyor_core::events::{
    DeadLetterEvent, NotificationEvent, NotificationLevel, SubmissionResponseEvent,
    WorkerOutcome, WorkerResponseEvent,
};
use conveyor_core::request::{truncate_cause, ErrorType, PendingStep, Request, RequestState};
use conveyor_core::store::RequestStore;

use crate::correlation::CorrelationResolver;
use crate::error::Result;
use crate::publisher::OutboundPublisher;

const SUCCESS_MESSAGE: &str = "Your request has been successfully handled.";

const ERROR_TITLE: &str = "Submission request failed";

const DONE_TITLE: &str = "Submission request completed";

const UNKNOWN_WORKER_ERROR: &str = "Unknown error reported by worker";

const INVALID_MESSAGE: &str = "Request body was invalidated by the processing worker";

const SKIPPED_MESSAGE: &str = "Request was skipped by the processing worker";

/// Counters for one processed response batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Requests that entered their first pending step (worker ack).
    pub linked: usize,
    /// Requests advanced one pending step.
    pub advanced: usize,
    /// Requests that reached `DONE`.
    pub completed: usize,
    /// Requests that reached `ERROR`.
    pub errored: usize,
    /// Events referencing a terminal request or a step other than the
    /// current one.
    pub dropped_stale: usize,
    /// Events referencing no stored request.
    pub dropped_unknown: usize,
    /// Events intentionally not processed (`Delayed`).
    pub ignored: usize,
}

/// One state change decided for a request.
struct PlannedTransition {
    request: Request,
    to: RequestState,
    error: Option<(ErrorType, String)>,
    link: Option<Uuid>,
}

/// Reconciles downstream worker responses into request state.
pub struct ResponseProcessor {
    store: Arc<dyn RequestStore>,
    resolver: CorrelationResolver,
    publisher: Arc<dyn OutboundPublisher>,
    notify_on_done: bool,
}

impl ResponseProcessor {
    /// Create a response processor with its collaborators.
    pub fn new(
        store: Arc<dyn RequestStore>,
        publisher: Arc<dyn OutboundPublisher>,
        notify_on_done: bool,
    ) -> Self {
        let resolver = CorrelationResolver::new(store.clone());
        Self {
            store,
            resolver,
            publisher,
            notify_on_done,
        }
    }

    /// Process one batch of worker responses for a tenant.
    #[instrument(skip(self, events), fields(tenant = %tenant, batch_size = events.len()))]
    pub async fn process_batch(
        &self,
        tenant: &str,
        events: Vec<WorkerResponseEvent>,
    ) -> Result<ResponseSummary> {
        // 1. Bulk-resolve ids, keeping only requests still eligible for
        //    updates. Terminal and unknown ids fall out here.
        let ids: Vec<String> = events.iter().map(|e| e.request_id.clone()).collect();
        let resolved = self
            .resolver
            .resolve(tenant, &ids, RequestState::active())
            .await?;

        let mut summary = ResponseSummary {
            dropped_stale: resolved.ineligible.len(),
            dropped_unknown: resolved.unknown.len(),
            ..ResponseSummary::default()
        };
        for (id, state) in &resolved.ineligible {
            debug!(
                tenant = %tenant,
                correlation_id = %id,
                state = state.code(),
                "Dropping response for request no longer eligible"
            );
        }

        // 2. Map outcomes to transitions, tracking each request's state
        //    locally so a later event in the same batch sees the earlier
        //    decision.
        let mut current: HashMap<String, RequestState> = resolved
            .matched
            .iter()
            .map(|(id, r)| (id.clone(), r.state))
            .collect();
        let mut planned: Vec<PlannedTransition> = Vec::new();

        for event in &events {
            let Some(state) = current.get(&event.request_id).copied() else {
                // Counted already via the resolver buckets.
                continue;
            };
            let request = resolved.matched[&event.request_id].clone();

            let transition = match event.outcome {
                WorkerOutcome::Delayed => {
                    summary.ignored += 1;
                    None
                }
                WorkerOutcome::Granted => {
                    if state == RequestState::Granted {
                        summary.linked += 1;
                        Some(PlannedTransition {
                            request,
                            to: RequestState::Pending(PendingStep::first()),
                            error: None,
                            link: event.job_id,
                        })
                    } else {
                        summary.dropped_stale += 1;
                        None
                    }
                }
                WorkerOutcome::Success => {
                    let next = event.step.and_then(|step| state.next_on_success(step));
                    match next {
                        Some(to) => {
                            if to == RequestState::Done {
                                summary.completed += 1;
                            } else {
                                summary.advanced += 1;
                            }
                            Some(PlannedTransition {
                                request,
                                to,
                                error: None,
                                link: None,
                            })
                        }
                        None => {
                            warn!(
                                tenant = %tenant,
                                correlation_id = %event.request_id,
                                state = state.code(),
                                reported_step = ?event.step,
                                "Dropping stale success response"
                            );
                            summary.dropped_stale += 1;
                            None
                        }
                    }
                }
                WorkerOutcome::Error => {
                    summary.errored += 1;
                    Some(PlannedTransition {
                        request,
                        to: RequestState::Error,
                        error: Some((ErrorType::Internal, join_messages(&event.messages))),
                        link: None,
                    })
                }
                WorkerOutcome::InvalidContent => {
                    summary.errored += 1;
                    Some(PlannedTransition {
                        request,
                        to: RequestState::Error,
                        error: Some((
                            ErrorType::InvalidContent,
                            join_with_fallback(&event.messages, INVALID_MESSAGE),
                        )),
                        link: None,
                    })
                }
                WorkerOutcome::Skipped => {
                    summary.errored += 1;
                    Some(PlannedTransition {
                        request,
                        to: RequestState::Error,
                        error: Some((
                            ErrorType::Internal,
                            join_with_fallback(&event.messages, SKIPPED_MESSAGE),
                        )),
                        link: None,
                    })
                }
            };

            if let Some(transition) = transition {
                current.insert(event.request_id.clone(), transition.to);
                planned.push(transition);
            }
        }

        self.apply_and_emit(tenant, planned).await?;

        info!(
            tenant = %tenant,
            linked = summary.linked,
            advanced = summary.advanced,
            completed = summary.completed,
            errored = summary.errored,
            dropped_stale = summary.dropped_stale,
            dropped_unknown = summary.dropped_unknown,
            "Worker response batch processed"
        );
        Ok(summary)
    }

    /// Force-fail requests whose work surfaced through the dead-letter path
    /// (unhandled worker crashes).
    #[instrument(skip(self, events), fields(tenant = %tenant, batch_size = events.len()))]
    pub async fn process_dead_letters(
        &self,
        tenant: &str,
        events: Vec<DeadLetterEvent>,
    ) -> Result<ResponseSummary> {
        let ids: Vec<String> = events.iter().map(|e| e.request_id.clone()).collect();
        let resolved = self
            .resolver
            .resolve(tenant, &ids, RequestState::active())
            .await?;

        let mut summary = ResponseSummary {
            dropped_stale: resolved.ineligible.len(),
            dropped_unknown: resolved.unknown.len(),
            ..ResponseSummary::default()
        };

        let mut seen = HashSet::new();
        let mut planned = Vec::new();
        for event in &events {
            let Some(request) = resolved.matched.get(&event.request_id) else {
                continue;
            };
            if !seen.insert(event.request_id.clone()) {
                summary.dropped_stale += 1;
                continue;
            }
            warn!(
                tenant = %tenant,
                correlation_id = %event.request_id,
                "Request failed through dead-letter path: {}",
                event.error
            );
            summary.errored += 1;
            planned.push(PlannedTransition {
                request: request.clone(),
                to: RequestState::Error,
                error: Some((ErrorType::Internal, event.error.clone())),
                link: None,
            });
        }

        self.apply_and_emit(tenant, planned).await?;
        Ok(summary)
    }

    /// Apply planned transitions as one bulk write per distinct target state,
    /// then emit terminal responses and failure notifications.
    async fn apply_and_emit(
        &self,
        tenant: &str,
        planned: Vec<PlannedTransition>,
    ) -> Result<()> {
        if planned.is_empty() {
            return Ok(());
        }
        let now = Utc::now();

        // Job linkage first, so an acknowledged request is never observed
        // pending without its job reference.
        for transition in &planned {
            if let Some(job_id) = transition.link {
                let linked = self
                    .store
                    .set_linked_job(tenant, transition.request.id, job_id, now)
                    .await?;
                if !linked {
                    debug!(
                        tenant = %tenant,
                        correlation_id = %transition.request.correlation_id,
                        "Request already carries a linked job"
                    );
                }
            }
        }

        // One bulk statement per distinct (state, error) target.
        let mut groups: Vec<(
            (RequestState, Option<(ErrorType, String)>),
            Vec<Uuid>,
        )> = Vec::new();
        for transition in &planned {
            let key = (transition.to, transition.error.clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, ids)) => ids.push(transition.request.id),
                None => groups.push((key, vec![transition.request.id])),
            }
        }
        for ((state, error), ids) in groups {
            self.store
                .bulk_update_state(tenant, &ids, state, error, now)
                .await?;
        }

        // Terminal transitions surface to callers; failures also notify.
        let mut responses = Vec::new();
        let mut notifications = Vec::new();
        for transition in &planned {
            match transition.to {
                RequestState::Done => {
                    let updated = transition.updated_request();
                    responses.push(SubmissionResponseEvent::terminal(&updated, SUCCESS_MESSAGE));
                    if self.notify_on_done {
                        notifications.push(NotificationEvent {
                            correlation_id: updated.correlation_id.clone(),
                            owner: updated.owner.clone(),
                            title: DONE_TITLE.to_string(),
                            message: SUCCESS_MESSAGE.to_string(),
                            level: NotificationLevel::Info,
                        });
                    }
                }
                RequestState::Error => {
                    let updated = transition.updated_request();
                    let cause = updated
                        .error_cause
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_WORKER_ERROR.to_string());
                    responses.push(SubmissionResponseEvent::terminal(&updated, cause.clone()));
                    notifications.push(NotificationEvent {
                        correlation_id: updated.correlation_id.clone(),
                        owner: updated.owner.clone(),
                        title: ERROR_TITLE.to_string(),
                        message: cause,
                        level: NotificationLevel::Error,
                    });
                }
                _ => {}
            }
        }
        if !responses.is_empty() {
            self.publisher.publish_responses(tenant, responses).await?;
        }
        if !notifications.is_empty() {
            self.publisher
                .publish_notifications(tenant, notifications)
                .await?;
        }
        Ok(())
    }
}

impl PlannedTransition {
    /// The request as it reads after this transition.
    fn updated_request(&self) -> Request {
        let mut updated = self.request.clone();
        updated.state = self.to;
        if let Some((error_type, cause)) = &self.error {
            updated.error_type = Some(*error_type);
            updated.error_cause = Some(truncate_cause(cause));
        }
        if self.link.is_some() {
            updated.linked_job_id = self.link;
        }
        updated
    }
}

fn join_messages(messages: &[String]) -> String {
    join_with_fallback(messages, UNKNOWN_WORKER_ERROR)
}

fn join_with_fallback(messages: &[String], fallback: &str) -> String {
    if messages.is_empty() {
        fallback.to_string()
    } else {
        messages.join(", ")
    }
}

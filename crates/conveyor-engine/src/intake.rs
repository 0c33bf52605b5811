// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Intake processing.
//!
//! Validates and persists inbound submission batches. Exactly one response
//! goes out per input, whatever happens to it: granted, denied with a reason,
//! or a replay of the stored outcome when the correlation id is already
//! known (idempotent re-delivery). Derived work events are emitted only for
//! requests persisted by this pass; if that emission fails the requests stay
//! `GRANTED` and the scheduler re-emits later - nothing is lost silently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use conveyor_core::events::{IntakeEvent, SubmissionResponseEvent, WorkRequestEvent};
use conveyor_core::request::{ErrorType, NewRequest, Request, RequestState};
use conveyor_core::store::RequestStore;

use crate::config::IntakeConfig;
use crate::error::{Error, Result};
use crate::publisher::OutboundPublisher;

const GRANTED_MESSAGE: &str = "Your request has been successfully registered.";

const ALREADY_REGISTERED_MESSAGE: &str =
    "A request with this correlation id is already registered; the original outcome applies.";

// ============================================================================
// Owner directory
// ============================================================================

/// External collaborator resolving submitting principals.
#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    /// True when `owner` is a known principal on `tenant`.
    async fn resolve(&self, tenant: &str, owner: &str) -> Result<bool>;
}

/// Owner directory backed by a fixed allow-list, selected at startup.
pub struct StaticOwnerDirectory {
    /// `None` accepts every non-empty owner.
    allowed: Option<HashSet<String>>,
}

impl StaticOwnerDirectory {
    /// Directory accepting every non-empty owner.
    pub fn allow_all() -> Self {
        Self { allowed: None }
    }

    /// Directory accepting exactly the given owners.
    pub fn with_owners(owners: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: Some(owners.into_iter().collect()),
        }
    }
}

#[async_trait]
impl OwnerDirectory for StaticOwnerDirectory {
    async fn resolve(&self, _tenant: &str, owner: &str) -> Result<bool> {
        if owner.is_empty() {
            return Ok(false);
        }
        Ok(match &self.allowed {
            Some(allowed) => allowed.contains(owner),
            None => true,
        })
    }
}

// ============================================================================
// Intake processor
// ============================================================================

/// Counters for one tenant's slice of an intake batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    /// Tenant the counters apply to.
    pub tenant: String,
    /// Requests newly persisted as `GRANTED`.
    pub granted: usize,
    /// Inputs rejected with a denial response.
    pub denied: usize,
    /// Inputs answered from an already-stored request.
    pub duplicates: usize,
    /// Derived work events actually emitted.
    pub work_emitted: usize,
}

/// How one input event is to be answered.
enum Disposition {
    /// Persist and grant.
    Accept(NewRequest),
    /// Reject with a reason; nothing is persisted.
    Deny(ErrorType, String),
    /// Correlation id already stored; replay its outcome.
    Replay(Request),
    /// Repeated correlation id within this batch; answer like the first
    /// occurrence without persisting again.
    EchoOfFirst,
}

/// Validates and persists inbound submission batches.
pub struct IntakeProcessor {
    store: Arc<dyn RequestStore>,
    publisher: Arc<dyn OutboundPublisher>,
    owners: Arc<dyn OwnerDirectory>,
    config: IntakeConfig,
}

impl IntakeProcessor {
    /// Create an intake processor with its collaborators.
    pub fn new(
        store: Arc<dyn RequestStore>,
        publisher: Arc<dyn OutboundPublisher>,
        owners: Arc<dyn OwnerDirectory>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            owners,
            config,
        }
    }

    /// Process one inbound batch, partitioned by tenant. Returns one summary
    /// per tenant seen in the batch.
    #[instrument(skip(self, events), fields(batch_size = events.len()))]
    pub async fn process_batch(&self, events: Vec<IntakeEvent>) -> Result<Vec<IntakeSummary>> {
        // All downstream calls are single-tenant.
        let mut by_tenant: BTreeMap<String, Vec<IntakeEvent>> = BTreeMap::new();
        for event in events {
            by_tenant.entry(event.tenant.clone()).or_default().push(event);
        }

        let mut summaries = Vec::with_capacity(by_tenant.len());
        for (tenant, tenant_events) in by_tenant {
            summaries.push(self.process_tenant_batch(&tenant, tenant_events).await?);
        }
        Ok(summaries)
    }

    async fn process_tenant_batch(
        &self,
        tenant: &str,
        events: Vec<IntakeEvent>,
    ) -> Result<IntakeSummary> {
        // 1. One bulk lookup for every correlation id in the batch.
        let ids: Vec<String> = events.iter().map(|e| e.correlation_id.clone()).collect();
        let existing = self.store.find_by_correlation_ids(tenant, &ids).await?;

        // 2. Validate each event; duplicates are dropped from persistence but
        //    still answered.
        let mut seen_in_batch: HashSet<String> = HashSet::new();
        let mut dispositions = Vec::with_capacity(events.len());
        for event in &events {
            let disposition = if let Some(stored) = existing.get(&event.correlation_id) {
                Disposition::Replay(stored.clone())
            } else if !seen_in_batch.insert(event.correlation_id.clone()) {
                Disposition::EchoOfFirst
            } else {
                self.validate(tenant, event).await?
            };
            dispositions.push(disposition);
        }

        // 3. Persist all accepted events in one bulk write. Side effects
        //    below are observable only after this commits.
        let accepted: Vec<NewRequest> = dispositions
            .iter()
            .filter_map(|d| match d {
                Disposition::Accept(new) => Some(new.clone()),
                _ => None,
            })
            .collect();
        let inserted = if accepted.is_empty() {
            Vec::new()
        } else {
            self.store.insert_batch(accepted).await?
        };
        let inserted_by_id: HashMap<&str, &Request> = inserted
            .iter()
            .map(|r| (r.correlation_id.as_str(), r))
            .collect();

        // 4. Exactly one response per input, in input order.
        let mut summary = IntakeSummary {
            tenant: tenant.to_string(),
            ..IntakeSummary::default()
        };
        let mut responses = Vec::with_capacity(events.len());
        for (event, disposition) in events.iter().zip(&dispositions) {
            let response = match disposition {
                Disposition::Accept(_) => {
                    summary.granted += 1;
                    let request = inserted_by_id[event.correlation_id.as_str()];
                    SubmissionResponseEvent::granted(request, GRANTED_MESSAGE)
                }
                Disposition::Deny(error_type, message) => {
                    summary.denied += 1;
                    warn!(
                        tenant = %tenant,
                        correlation_id = %event.correlation_id,
                        error_type = error_type.code(),
                        "Submission denied: {}", message
                    );
                    SubmissionResponseEvent::denied(&event.correlation_id, *error_type, message)
                }
                Disposition::Replay(stored) => {
                    summary.duplicates += 1;
                    SubmissionResponseEvent::from_state(stored, ALREADY_REGISTERED_MESSAGE)
                }
                Disposition::EchoOfFirst => {
                    summary.duplicates += 1;
                    match inserted_by_id.get(event.correlation_id.as_str()) {
                        Some(request) => {
                            SubmissionResponseEvent::from_state(request, ALREADY_REGISTERED_MESSAGE)
                        }
                        // First occurrence was itself denied; repeat the denial.
                        None => SubmissionResponseEvent::denied(
                            &event.correlation_id,
                            ErrorType::InvalidContent,
                            ALREADY_REGISTERED_MESSAGE,
                        ),
                    }
                }
            };
            responses.push(response);
        }
        self.publisher.publish_responses(tenant, responses).await?;

        // 5. One derived work event per newly granted request. A failure here
        //    is not fatal: the requests stay GRANTED and the scheduler
        //    re-emits their work later.
        let work_events: Vec<WorkRequestEvent> = inserted
            .iter()
            .filter_map(|request| build_work_event(request, &self.config))
            .collect();
        if !work_events.is_empty() {
            let emitted = work_events.len();
            match self
                .publisher
                .publish_work_requests(tenant, work_events)
                .await
            {
                Ok(()) => summary.work_emitted = emitted,
                Err(e) => {
                    warn!(
                        tenant = %tenant,
                        error = %e,
                        "Failed to emit derived work events; granted requests await redispatch"
                    );
                }
            }
        }

        info!(
            tenant = %tenant,
            granted = summary.granted,
            denied = summary.denied,
            duplicates = summary.duplicates,
            "Intake batch processed"
        );
        Ok(summary)
    }

    /// Validate one event. Validation failures are deterministic denials;
    /// only infrastructure failures (owner directory unreachable) are errors.
    async fn validate(&self, tenant: &str, event: &IntakeEvent) -> Result<Disposition> {
        if event.correlation_id.is_empty()
            || event.correlation_id.len() > self.config.max_correlation_id_len
        {
            return Ok(Disposition::Deny(
                ErrorType::InvalidContent,
                format!(
                    "Correlation id must be between 1 and {} characters",
                    self.config.max_correlation_id_len
                ),
            ));
        }

        if !self.owners.resolve(tenant, &event.owner).await? {
            return Ok(Disposition::Deny(
                ErrorType::Forbidden,
                format!("Owner <{}> could not be resolved", event.owner),
            ));
        }

        if !self.config.targets.contains_key(&event.target) {
            return Ok(Disposition::Deny(
                ErrorType::InvalidContent,
                format!(
                    "Target <{}> is not configured on tenant <{}>",
                    event.target, tenant
                ),
            ));
        }

        let payload_size = serde_json::to_vec(&event.payload)
            .map_err(Error::Json)?
            .len();
        if payload_size > self.config.max_payload_bytes {
            return Ok(Disposition::Deny(
                ErrorType::InvalidContent,
                format!(
                    "Payload of {} bytes exceeds the {} byte limit",
                    payload_size, self.config.max_payload_bytes
                ),
            ));
        }

        let now = Utc::now();
        let ttl = event
            .ttl_seconds
            .filter(|secs| *secs > 0)
            .map(chrono::Duration::seconds)
            .unwrap_or_else(|| {
                chrono::Duration::from_std(self.config.default_ttl)
                    .unwrap_or_else(|_| chrono::Duration::hours(24))
            });
        let session = event
            .session
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{}-{}", event.owner, now.format("%Y%m%d")));

        Ok(Disposition::Accept(NewRequest {
            correlation_id: event.correlation_id.clone(),
            tenant: tenant.to_string(),
            owner: event.owner.clone(),
            session,
            target: event.target.clone(),
            payload: event.payload.clone(),
            state: RequestState::Granted,
            priority: event.priority.unwrap_or(0),
            expiry_date: now + ttl,
        }))
    }
}

/// Derived work event for a granted request, from the configured target
/// table. `None` when the request's target is no longer configured.
pub fn build_work_event(request: &Request, config: &IntakeConfig) -> Option<WorkRequestEvent> {
    let target = config.targets.get(&request.target)?;
    Some(WorkRequestEvent {
        correlation_id: request.correlation_id.clone(),
        tenant: request.tenant.clone(),
        owner: request.owner.clone(),
        session: request.session.clone(),
        storage_target: target.storage.clone(),
        model: target.model.clone(),
        payload_ref: request.id.to_string(),
    })
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Correlation resolution.
//!
//! Maps the request-id headers of inbound response batches back to stored
//! requests, filtered by the set of states still acceptable for the update at
//! hand. Unknown ids and requests already outside the eligible set are
//! ordinary outcomes here - at-least-once delivery makes duplicates and
//! stale responses routine - so they are returned as counts, not errors.

use std::collections::HashMap;
use std::sync::Arc;

use conveyor_core::request::{Request, RequestState};
use conveyor_core::store::RequestStore;

use crate::error::Result;

/// Result of resolving one batch of request ids.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    /// Requests found in an eligible state, keyed by correlation id.
    pub matched: HashMap<String, Request>,
    /// Ids found but in a state outside the eligible set (typically already
    /// terminal), with the state they were found in.
    pub ineligible: Vec<(String, RequestState)>,
    /// Ids with no stored request in this tenant.
    pub unknown: Vec<String>,
}

/// Resolves response request-ids against the store.
pub struct CorrelationResolver {
    store: Arc<dyn RequestStore>,
}

impl CorrelationResolver {
    /// Create a resolver over the given store.
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// Bulk-resolve `correlation_ids` within `tenant`, keeping only requests
    /// currently in one of `eligible` states. One store round-trip per batch.
    pub async fn resolve(
        &self,
        tenant: &str,
        correlation_ids: &[String],
        eligible: &[RequestState],
    ) -> Result<ResolvedBatch> {
        let mut ids: Vec<String> = correlation_ids.to_vec();
        ids.sort();
        ids.dedup();

        let found = self.store.find_by_correlation_ids(tenant, &ids).await?;

        let mut batch = ResolvedBatch::default();
        for id in ids {
            match found.get(&id) {
                Some(request) if eligible.contains(&request.state) => {
                    batch.matched.insert(id, request.clone());
                }
                Some(request) => batch.ineligible.push((id, request.state)),
                None => batch.unknown.push(id),
            }
        }
        Ok(batch)
    }
}

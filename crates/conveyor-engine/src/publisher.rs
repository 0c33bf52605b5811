// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound event publishing.
//!
//! Transport wiring (exchanges, queues, routing) is the embedding
//! application's concern; the engine publishes through this seam and never
//! learns where events go. Two backends ship with the engine: a recording
//! publisher for embedded use and tests, and a logging publisher that writes
//! events to the log until a broker integration is plugged in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use conveyor_core::events::{
    NotificationEvent, StopJobSignal, SubmissionResponseEvent, WorkRequestEvent,
};

use crate::error::{Error, Result};

/// Sink for every event the engine emits.
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    /// Publish per-input submission responses (granted/denied/terminal).
    async fn publish_responses(
        &self,
        tenant: &str,
        events: Vec<SubmissionResponseEvent>,
    ) -> Result<()>;

    /// Publish derived work events for external workers.
    async fn publish_work_requests(
        &self,
        tenant: &str,
        events: Vec<WorkRequestEvent>,
    ) -> Result<()>;

    /// Publish user-facing notifications.
    async fn publish_notifications(
        &self,
        tenant: &str,
        events: Vec<NotificationEvent>,
    ) -> Result<()>;

    /// Publish advisory stop-job signals.
    async fn publish_stop_signals(&self, tenant: &str, signals: Vec<StopJobSignal>)
        -> Result<()>;
}

// ============================================================================
// Recording backend
// ============================================================================

/// Publisher that retains everything in memory.
///
/// Embedded deployments drain it from their own dispatch loop; tests assert
/// on it. Emission failures can be injected per channel to exercise the
/// recovery paths.
#[derive(Default)]
pub struct RecordingPublisher {
    responses: Mutex<Vec<(String, SubmissionResponseEvent)>>,
    work_requests: Mutex<Vec<(String, WorkRequestEvent)>>,
    notifications: Mutex<Vec<(String, NotificationEvent)>>,
    stop_signals: Mutex<Vec<(String, StopJobSignal)>>,
    fail_responses: AtomicBool,
    fail_work_requests: AtomicBool,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent response publication fail.
    pub fn fail_responses(&self, fail: bool) {
        self.fail_responses.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent work-request publication fail.
    pub fn fail_work_requests(&self, fail: bool) {
        self.fail_work_requests.store(fail, Ordering::SeqCst);
    }

    /// Recorded responses, in publication order.
    pub fn responses(&self) -> Vec<(String, SubmissionResponseEvent)> {
        self.responses.lock().unwrap().clone()
    }

    /// Recorded work requests, in publication order.
    pub fn work_requests(&self) -> Vec<(String, WorkRequestEvent)> {
        self.work_requests.lock().unwrap().clone()
    }

    /// Recorded notifications, in publication order.
    pub fn notifications(&self) -> Vec<(String, NotificationEvent)> {
        self.notifications.lock().unwrap().clone()
    }

    /// Recorded stop signals, in publication order.
    pub fn stop_signals(&self) -> Vec<(String, StopJobSignal)> {
        self.stop_signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundPublisher for RecordingPublisher {
    async fn publish_responses(
        &self,
        tenant: &str,
        events: Vec<SubmissionResponseEvent>,
    ) -> Result<()> {
        if self.fail_responses.load(Ordering::SeqCst) {
            return Err(Error::Publish("response channel unavailable".to_string()));
        }
        let mut responses = self.responses.lock().unwrap();
        responses.extend(events.into_iter().map(|e| (tenant.to_string(), e)));
        Ok(())
    }

    async fn publish_work_requests(
        &self,
        tenant: &str,
        events: Vec<WorkRequestEvent>,
    ) -> Result<()> {
        if self.fail_work_requests.load(Ordering::SeqCst) {
            return Err(Error::Publish("work channel unavailable".to_string()));
        }
        let mut work_requests = self.work_requests.lock().unwrap();
        work_requests.extend(events.into_iter().map(|e| (tenant.to_string(), e)));
        Ok(())
    }

    async fn publish_notifications(
        &self,
        tenant: &str,
        events: Vec<NotificationEvent>,
    ) -> Result<()> {
        let mut notifications = self.notifications.lock().unwrap();
        notifications.extend(events.into_iter().map(|e| (tenant.to_string(), e)));
        Ok(())
    }

    async fn publish_stop_signals(
        &self,
        tenant: &str,
        signals: Vec<StopJobSignal>,
    ) -> Result<()> {
        let mut stop_signals = self.stop_signals.lock().unwrap();
        stop_signals.extend(signals.into_iter().map(|s| (tenant.to_string(), s)));
        Ok(())
    }
}

// ============================================================================
// Logging backend
// ============================================================================

/// Publisher that writes every event to the log.
///
/// The daemon's default sink when no broker integration is wired in; keeps
/// emitted events observable without inventing a transport.
#[derive(Default)]
pub struct LoggingPublisher;

impl LoggingPublisher {
    /// Create a logging publisher.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutboundPublisher for LoggingPublisher {
    async fn publish_responses(
        &self,
        tenant: &str,
        events: Vec<SubmissionResponseEvent>,
    ) -> Result<()> {
        for event in events {
            info!(
                tenant = %tenant,
                correlation_id = %event.correlation_id,
                payload = %serde_json::to_string(&event)?,
                "submission response"
            );
        }
        Ok(())
    }

    async fn publish_work_requests(
        &self,
        tenant: &str,
        events: Vec<WorkRequestEvent>,
    ) -> Result<()> {
        for event in events {
            info!(
                tenant = %tenant,
                correlation_id = %event.correlation_id,
                payload = %serde_json::to_string(&event)?,
                "derived work request"
            );
        }
        Ok(())
    }

    async fn publish_notifications(
        &self,
        tenant: &str,
        events: Vec<NotificationEvent>,
    ) -> Result<()> {
        for event in events {
            info!(
                tenant = %tenant,
                correlation_id = %event.correlation_id,
                payload = %serde_json::to_string(&event)?,
                "notification"
            );
        }
        Ok(())
    }

    async fn publish_stop_signals(
        &self,
        tenant: &str,
        signals: Vec<StopJobSignal>,
    ) -> Result<()> {
        for signal in signals {
            info!(tenant = %tenant, job_id = %signal.job_id, "stop-job signal");
        }
        Ok(())
    }
}

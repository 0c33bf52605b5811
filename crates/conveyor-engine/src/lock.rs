// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster-wide tenant locks with bounded leases.
//!
//! The lock keyed by (tenant, task) is the only mutual-exclusion primitive in
//! the system: it keeps two scheduler instances from sweeping the same tenant
//! at once. Acquisition never blocks; a held lock means "skip this cycle".
//! The lease expires on its own, so a crashed holder stalls a tenant for at
//! most one lease duration.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Cluster-wide mutual exclusion keyed by (tenant, task).
#[async_trait]
pub trait TenantLock: Send + Sync {
    /// Try to take the lock for `lease`. Returns false immediately when the
    /// lock is held elsewhere; never waits.
    async fn try_acquire(&self, tenant: &str, task: &str, lease: Duration) -> Result<bool>;

    /// Release the lock if this instance holds it. Releasing a lock taken
    /// over by another holder (after lease expiry) is a no-op.
    async fn release(&self, tenant: &str, task: &str) -> Result<()>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local lock backend for single-instance embedded deployments.
#[derive(Default)]
pub struct MemoryTenantLock {
    held: Mutex<HashMap<(String, String), Instant>>,
}

impl MemoryTenantLock {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantLock for MemoryTenantLock {
    async fn try_acquire(&self, tenant: &str, task: &str, lease: Duration) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        let key = (tenant.to_string(), task.to_string());
        let now = Instant::now();
        match held.get(&key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                held.insert(key, now + lease);
                Ok(true)
            }
        }
    }

    async fn release(&self, tenant: &str, task: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        held.remove(&(tenant.to_string(), task.to_string()));
        Ok(())
    }
}

// ============================================================================
// Postgres backend
// ============================================================================

/// Postgres-backed lock: one row per (tenant, task), taken over only once the
/// previous lease has expired.
pub struct PostgresTenantLock {
    pool: PgPool,
    /// Identifies this instance so release cannot drop a lock that has been
    /// taken over after lease expiry.
    holder: Uuid,
}

impl PostgresTenantLock {
    /// Create a lock backend with a fresh holder identity.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            holder: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl TenantLock for PostgresTenantLock {
    async fn try_acquire(&self, tenant: &str, task: &str, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenant_locks (tenant, task, holder, expires_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            ON CONFLICT (tenant, task) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE tenant_locks.expires_at <= NOW()
            "#,
        )
        .bind(tenant)
        .bind(task)
        .bind(self.holder)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, tenant: &str, task: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM tenant_locks WHERE tenant = $1 AND task = $2 AND holder = $3",
        )
        .bind(tenant)
        .bind(task)
        .bind(self.holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

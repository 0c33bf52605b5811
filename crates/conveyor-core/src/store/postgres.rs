// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed request store.
//!
//! Every state-changing operation is a single statement whose `WHERE` clause
//! carries the terminal-state guard, so concurrent schedulers and response
//! handlers can never regress a finished request or observe one half-updated.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;
use crate::request::{
    truncate_cause, ErrorType, NewRequest, Request, RequestState,
};
use crate::store::RequestStore;

/// PostgreSQL-backed request store.
#[derive(Clone)]
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    /// Create a new Postgres-backed store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row as stored; state and error codes are parsed on the way out.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    correlation_id: String,
    tenant: String,
    owner: String,
    session: String,
    target: String,
    payload: serde_json::Value,
    state: String,
    priority: i16,
    linked_job_id: Option<Uuid>,
    error_type: Option<String>,
    error_cause: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = CoreError;

    fn try_from(row: RequestRow) -> Result<Self, CoreError> {
        let state = RequestState::parse(&row.state).ok_or_else(|| CoreError::UnknownStateCode {
            code: row.state.clone(),
        })?;
        let error_type = match row.error_type {
            Some(code) => Some(
                ErrorType::parse(&code).ok_or(CoreError::UnknownStateCode { code })?,
            ),
            None => None,
        };
        Ok(Request {
            id: row.id,
            correlation_id: row.correlation_id,
            tenant: row.tenant,
            owner: row.owner,
            session: row.session,
            target: row.target,
            payload: row.payload,
            state,
            priority: row.priority,
            linked_job_id: row.linked_job_id,
            error_type,
            error_cause: row.error_cause,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expiry_date: row.expiry_date,
        })
    }
}

const SELECT_COLUMNS: &str = "id, correlation_id, tenant, owner, session, target, payload, \
     state, priority, linked_job_id, error_type, error_cause, \
     created_at, updated_at, expiry_date";

fn rows_to_requests(rows: Vec<RequestRow>) -> Result<Vec<Request>, CoreError> {
    rows.into_iter().map(Request::try_from).collect()
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    async fn get(
        &self,
        tenant: &str,
        correlation_id: &str,
    ) -> Result<Option<Request>, CoreError> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM requests
            WHERE tenant = $1 AND correlation_id = $2
            "#
        ))
        .bind(tenant)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Request::try_from).transpose()
    }

    async fn find_by_correlation_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
    ) -> Result<HashMap<String, Request>, CoreError> {
        if correlation_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM requests
            WHERE tenant = $1 AND correlation_id = ANY($2)
            "#
        ))
        .bind(tenant)
        .bind(correlation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows_to_requests(rows)?
            .into_iter()
            .map(|r| (r.correlation_id.clone(), r))
            .collect())
    }

    async fn insert_batch(&self, new: Vec<NewRequest>) -> Result<Vec<Request>, CoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(new.len());

        for candidate in new {
            let request = Request {
                id: Uuid::new_v4(),
                correlation_id: candidate.correlation_id,
                tenant: candidate.tenant,
                owner: candidate.owner,
                session: candidate.session,
                target: candidate.target,
                payload: candidate.payload,
                state: candidate.state,
                priority: candidate.priority,
                linked_job_id: None,
                error_type: None,
                error_cause: None,
                created_at: now,
                updated_at: now,
                expiry_date: candidate.expiry_date,
            };

            let result = sqlx::query(
                r#"
                INSERT INTO requests
                    (id, correlation_id, tenant, owner, session, target, payload,
                     state, priority, created_at, updated_at, expiry_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(request.id)
            .bind(&request.correlation_id)
            .bind(&request.tenant)
            .bind(&request.owner)
            .bind(&request.session)
            .bind(&request.target)
            .bind(&request.payload)
            .bind(request.state.code())
            .bind(request.priority)
            .bind(request.created_at)
            .bind(request.updated_at)
            .bind(request.expiry_date)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => inserted.push(request),
                Err(e) => {
                    let duplicate = e
                        .as_database_error()
                        .is_some_and(|db| db.is_unique_violation());
                    tx.rollback().await.ok();
                    if duplicate {
                        return Err(CoreError::DuplicateCorrelationId {
                            tenant: request.tenant,
                            correlation_id: request.correlation_id,
                        });
                    }
                    return Err(e.into());
                }
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_due_for_expiry(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM requests
            WHERE tenant = $1
              AND state NOT IN ('DONE', 'DENIED', 'ERROR')
              AND expiry_date <= $2
            ORDER BY priority ASC, expiry_date ASC
            LIMIT $3
            "#
        ))
        .bind(tenant)
        .bind(cutoff)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        rows_to_requests(rows)
    }

    async fn find_redispatchable(
        &self,
        tenant: &str,
        older_than: DateTime<Utc>,
        page_size: i64,
    ) -> Result<Vec<Request>, CoreError> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM requests
            WHERE tenant = $1
              AND state = 'GRANTED'
              AND linked_job_id IS NULL
              AND updated_at <= $2
            ORDER BY priority ASC, updated_at ASC
            LIMIT $3
            "#
        ))
        .bind(tenant)
        .bind(older_than)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        rows_to_requests(rows)
    }

    async fn find_by_request_ids(
        &self,
        tenant: &str,
        correlation_ids: &[String],
        eligible: &[RequestState],
    ) -> Result<Vec<Request>, CoreError> {
        if correlation_ids.is_empty() || eligible.is_empty() {
            return Ok(Vec::new());
        }
        let codes: Vec<String> = eligible.iter().map(|s| s.code().to_string()).collect();
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM requests
            WHERE tenant = $1
              AND correlation_id = ANY($2)
              AND state = ANY($3)
            "#
        ))
        .bind(tenant)
        .bind(correlation_ids)
        .bind(&codes)
        .fetch_all(&self.pool)
        .await?;

        rows_to_requests(rows)
    }

    async fn bulk_update_state(
        &self,
        tenant: &str,
        ids: &[Uuid],
        state: RequestState,
        error: Option<(ErrorType, String)>,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (error_type, error_cause) = match error {
            Some((error_type, cause)) => {
                (Some(error_type.code()), Some(truncate_cause(&cause)))
            }
            None => (None, None),
        };
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET state = $3,
                error_type = COALESCE($4, error_type),
                error_cause = COALESCE($5, error_cause),
                updated_at = $6
            WHERE tenant = $1
              AND id = ANY($2)
              AND state NOT IN ('DONE', 'DENIED', 'ERROR')
            "#,
        )
        .bind(tenant)
        .bind(ids)
        .bind(state.code())
        .bind(error_type)
        .bind(error_cause)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn set_linked_job(
        &self,
        tenant: &str,
        id: Uuid,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET linked_job_id = $3, updated_at = $4
            WHERE tenant = $1 AND id = $2 AND linked_job_id IS NULL
            "#,
        )
        .bind(tenant)
        .bind(id)
        .bind(job_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already linked" from "no such request".
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM requests WHERE tenant = $1 AND id = $2",
        )
        .bind(tenant)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if exists == 0 {
            return Err(CoreError::RequestNotFound {
                correlation_id: id.to_string(),
            });
        }
        Ok(false)
    }

    async fn delete_terminal_older_than(
        &self,
        tenant: &str,
        cutoff: DateTime<Utc>,
        page_size: i64,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM requests
            WHERE id IN (
                SELECT id FROM requests
                WHERE tenant = $1
                  AND state IN ('DONE', 'DENIED', 'ERROR')
                  AND updated_at <= $2
                ORDER BY updated_at ASC
                LIMIT $3
            )
            "#,
        )
        .bind(tenant)
        .bind(cutoff)
        .bind(page_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

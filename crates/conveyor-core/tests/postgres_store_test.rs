// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Postgres request store tests. Require a reachable database.

use chrono::{Duration, Utc};
use conveyor_core::request::{ErrorType, NewRequest, RequestState};
use conveyor_core::store::{PostgresRequestStore, RequestStore};
use sqlx::PgPool;
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_CONVEYOR_DATABASE_URL").is_err()
            && std::env::var("CONVEYOR_DATABASE_URL").is_err()
        {
            eprintln!(
                "Skipping test: TEST_CONVEYOR_DATABASE_URL or CONVEYOR_DATABASE_URL not set"
            );
            return;
        }
    };
}

async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_CONVEYOR_DATABASE_URL")
        .or_else(|_| std::env::var("CONVEYOR_DATABASE_URL"))
        .ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    conveyor_core::migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

fn unique_tenant() -> String {
    format!("tenant-{}", Uuid::new_v4())
}

fn new_request(tenant: &str, correlation_id: &str) -> NewRequest {
    NewRequest {
        correlation_id: correlation_id.to_string(),
        tenant: tenant.to_string(),
        owner: "user".to_string(),
        session: "user-20250101".to_string(),
        target: "DATA".to_string(),
        payload: serde_json::json!({"name": "example"}),
        state: RequestState::Granted,
        priority: 0,
        expiry_date: Utc::now() + Duration::hours(24),
    }
}

async fn cleanup(pool: &PgPool, tenant: &str) {
    sqlx::query("DELETE FROM requests WHERE tenant = $1")
        .bind(tenant)
        .execute(pool)
        .await
        .ok();
}

#[tokio::test]
async fn test_insert_lookup_and_duplicate() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let store = PostgresRequestStore::new(pool.clone());
    let tenant = unique_tenant();

    let inserted = store
        .insert_batch(vec![
            new_request(&tenant, "corr-1"),
            new_request(&tenant, "corr-2"),
        ])
        .await
        .expect("insert failed");
    assert_eq!(inserted.len(), 2);

    let found = store
        .find_by_correlation_ids(&tenant, &["corr-1".to_string(), "corr-3".to_string()])
        .await
        .expect("lookup failed");
    assert_eq!(found.len(), 1);
    assert!(found.contains_key("corr-1"));

    let err = store
        .insert_batch(vec![new_request(&tenant, "corr-1")])
        .await
        .expect_err("duplicate must be rejected");
    assert_eq!(err.error_code(), "DUPLICATE_CORRELATION_ID");

    cleanup(&pool, &tenant).await;
}

#[tokio::test]
async fn test_bulk_update_respects_terminal_guard() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let store = PostgresRequestStore::new(pool.clone());
    let tenant = unique_tenant();

    let inserted = store
        .insert_batch(vec![
            new_request(&tenant, "corr-1"),
            new_request(&tenant, "corr-2"),
        ])
        .await
        .expect("insert failed");
    let ids: Vec<Uuid> = inserted.iter().map(|r| r.id).collect();

    store
        .bulk_update_state(&tenant, &ids[..1], RequestState::Done, None, Utc::now())
        .await
        .expect("update failed");

    let updated = store
        .bulk_update_state(
            &tenant,
            &ids,
            RequestState::Error,
            Some((ErrorType::Expired, "expired before completion".to_string())),
            Utc::now(),
        )
        .await
        .expect("update failed");
    assert_eq!(updated, 1);

    let done = store.get(&tenant, "corr-1").await.unwrap().unwrap();
    assert_eq!(done.state, RequestState::Done);
    let errored = store.get(&tenant, "corr-2").await.unwrap().unwrap();
    assert_eq!(errored.state, RequestState::Error);
    assert_eq!(errored.error_type, Some(ErrorType::Expired));

    cleanup(&pool, &tenant).await;
}

#[tokio::test]
async fn test_expiry_scan_pages_in_priority_order() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let store = PostgresRequestStore::new(pool.clone());
    let tenant = unique_tenant();
    let now = Utc::now();

    let mut first = new_request(&tenant, "corr-first");
    first.expiry_date = now - Duration::hours(1);
    first.priority = 1;
    let mut second = new_request(&tenant, "corr-second");
    second.expiry_date = now - Duration::hours(3);
    second.priority = 5;
    let mut live = new_request(&tenant, "corr-live");
    live.expiry_date = now + Duration::hours(1);

    store
        .insert_batch(vec![first, second, live])
        .await
        .expect("insert failed");

    let due = store
        .find_due_for_expiry(&tenant, now, 10)
        .await
        .expect("scan failed");
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].correlation_id, "corr-first");
    assert_eq!(due[1].correlation_id, "corr-second");

    let page = store
        .find_due_for_expiry(&tenant, now, 1)
        .await
        .expect("scan failed");
    assert_eq!(page.len(), 1);

    cleanup(&pool, &tenant).await;
}

#[tokio::test]
async fn test_set_linked_job_once() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        return;
    };
    let store = PostgresRequestStore::new(pool.clone());
    let tenant = unique_tenant();

    let inserted = store
        .insert_batch(vec![new_request(&tenant, "corr-1")])
        .await
        .expect("insert failed");
    let job = Uuid::new_v4();

    assert!(store
        .set_linked_job(&tenant, inserted[0].id, job, Utc::now())
        .await
        .expect("link failed"));
    assert!(!store
        .set_linked_job(&tenant, inserted[0].id, Uuid::new_v4(), Utc::now())
        .await
        .expect("relink check failed"));

    let stored = store.get(&tenant, "corr-1").await.unwrap().unwrap();
    assert_eq!(stored.linked_job_id, Some(job));

    cleanup(&pool, &tenant).await;
}

//! PostgreSQL ledger tests. Run with `cargo test -- --ignored` against a
//! database reachable through `DATABASE_URL`.

mod common;

use chrono::Utc;
use std::sync::Arc;
use txn_guard::idempotency::{
    GuardDependencies, IdempotencyGuard, LedgerError, NewRequestRecord, Outcome,
    PostgresRequestLedger, RejectReason, RequestLedger, RequestStatus, TransactionIds,
    MAX_TXN_ID_LEN,
};
use uuid::Uuid;

fn unique_txn_id() -> String {
    format!("TXN-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_insert_find_and_save() {
    let pool = common::setup_test_db().await;
    let ledger = PostgresRequestLedger::new(pool.clone());

    let txn_id = unique_txn_id();
    let key = common::derive_key("/orders", &txn_id, "B1");
    let start = NewRequestRecord::start(&key, "B1", "/orders");

    let inserted = ledger.insert_start(&start).await.expect("Failed to insert");
    assert_eq!(inserted.status, RequestStatus::Start);
    assert_eq!(inserted.ver, 0);
    assert!(inserted.end_time.is_none());

    let mut found = ledger
        .find_by_key(key.as_str())
        .await
        .expect("Failed to look up")
        .expect("Record should exist");
    assert_eq!(found.id, inserted.id);

    found.complete(RequestStatus::Success, Utc::now());
    let saved = ledger.save(&found).await.expect("Failed to save");
    assert_eq!(saved.status, RequestStatus::Success);
    assert_eq!(saved.ver, 1);
    assert!(saved.end_time.is_some());

    common::cleanup_api_requests(&pool, key.as_str()).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_duplicate_insert_maps_to_duplicate_key() {
    let pool = common::setup_test_db().await;
    let ledger = PostgresRequestLedger::new(pool.clone());

    let key = common::derive_key("/orders", &unique_txn_id(), "B1");
    let start = NewRequestRecord::start(&key, "B1", "/orders");

    ledger.insert_start(&start).await.expect("Failed to insert");
    let err = ledger.insert_start(&start).await.unwrap_err();

    assert!(matches!(err, LedgerError::DuplicateKey(_)));

    common::cleanup_api_requests(&pool, key.as_str()).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_find_unknown_key() {
    let pool = common::setup_test_db().await;
    let ledger = PostgresRequestLedger::new(pool);

    let found = ledger.find_by_key("does-not-exist").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_count_by_status() {
    let pool = common::setup_test_db().await;
    let ledger = PostgresRequestLedger::new(pool.clone());

    let before = ledger.count_by_status(RequestStatus::Start).await.unwrap();
    let key = common::derive_key("/orders", &unique_txn_id(), "B1");
    ledger
        .insert_start(&NewRequestRecord::start(&key, "B1", "/orders"))
        .await
        .unwrap();
    let after = ledger.count_by_status(RequestStatus::Start).await.unwrap();

    assert!(after > before);

    common::cleanup_api_requests(&pool, key.as_str()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_admits_against_unique_constraint() {
    const CALLERS: usize = 8;

    let pool = common::setup_test_db().await;
    let ledger = Arc::new(PostgresRequestLedger::new(pool.clone()));
    let guard = Arc::new(IdempotencyGuard::new(GuardDependencies::new(ledger)));
    let txn_id = unique_txn_id();

    let mut handles = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        let guard = Arc::clone(&guard);
        let ids = TransactionIds::new(txn_id.clone(), "B1");
        handles.push(tokio::spawn(async move {
            match guard.admit("/orders", &ids).await {
                Ok(token) => {
                    guard.finish(token, Outcome::Success).await;
                    Ok(())
                }
                Err(reason) => Err(reason),
            }
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(reason) => assert_eq!(reason, RejectReason::DuplicateRequest),
        }
    }
    assert_eq!(admitted, 1);

    let key = common::derive_key("/orders", &txn_id, "B1");
    common::cleanup_api_requests(&pool, key.as_str()).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_longest_accepted_ids_are_stored() {
    let pool = common::setup_test_db().await;
    let ledger = Arc::new(PostgresRequestLedger::new(pool.clone()));
    let guard = IdempotencyGuard::new(GuardDependencies::new(ledger.clone()));

    let txn_id = format!("{}{}", unique_txn_id(), "T".repeat(MAX_TXN_ID_LEN - 40));
    let business_txn_id = "B".repeat(MAX_TXN_ID_LEN);
    let ids = TransactionIds::new(txn_id.clone(), business_txn_id.clone());

    let token = guard
        .admit("/orders", &ids)
        .await
        .expect("Long ids should be admitted");
    guard.finish(token, Outcome::Success).await;

    let key = common::derive_key("/orders", &txn_id, &business_txn_id);
    let record = ledger
        .find_by_key(key.as_str())
        .await
        .unwrap()
        .expect("Record should exist");
    assert_eq!(record.status, RequestStatus::Success);
    assert_eq!(record.business_txn_id.len(), MAX_TXN_ID_LEN);

    assert_eq!(
        guard.admit("/orders", &ids).await.unwrap_err(),
        RejectReason::DuplicateRequest
    );

    common::cleanup_api_requests(&pool, key.as_str()).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_ping() {
    let pool = common::setup_test_db().await;
    let ledger = PostgresRequestLedger::new(pool);

    ledger.ping().await.expect("Ping should succeed");
}

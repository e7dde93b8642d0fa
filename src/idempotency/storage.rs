use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::idempotency::key_generator::IdempotencyKey;

/// Lifecycle status of an API request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR")]
pub enum RequestStatus {
    Start,
    Success,
    Fail,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Start)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Start => "Start",
            RequestStatus::Success => "Success",
            RequestStatus::Fail => "Fail",
        }
    }
}

/// One row of the `api_request` ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestRecord {
    pub id: i64,
    pub business_txn_id: String,
    pub api_request_key: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub ver: i32,
    pub api_url: String,
    pub status: RequestStatus,
}

impl RequestRecord {
    /// Moves the record to a terminal status and stamps the end time.
    pub fn complete(&mut self, status: RequestStatus, at: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(at);
        self.ver += 1;
    }
}

/// A start record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRequestRecord {
    pub business_txn_id: String,
    pub api_request_key: String,
    pub api_url: String,
    pub start_time: DateTime<Utc>,
}

impl NewRequestRecord {
    pub fn start(key: &IdempotencyKey, business_txn_id: &str, api_url: &str) -> Self {
        Self {
            business_txn_id: business_txn_id.to_string(),
            api_request_key: key.as_str().to_string(),
            api_url: api_url.to_string(),
            start_time: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("api request key already exists: {0}")]
    DuplicateKey(String),

    #[error("api request record not found: {0}")]
    NotFound(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Durable store of one record per idempotency key.
///
/// Implementations must reject a second insert for the same key with
/// [`LedgerError::DuplicateKey`]; the guard relies on that for correctness
/// when two identical requests race past the lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestLedger: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<RequestRecord>, LedgerError>;

    async fn insert_start(&self, record: &NewRequestRecord) -> Result<RequestRecord, LedgerError>;

    /// Persists status, end time and version of an existing record.
    async fn save(&self, record: &RequestRecord) -> Result<RequestRecord, LedgerError>;

    async fn ping(&self) -> Result<(), LedgerError>;
}

/// PostgreSQL-backed ledger over the `api_request` table.
#[derive(Clone)]
pub struct PostgresRequestLedger {
    pool: PgPool,
}

impl PostgresRequestLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Counts records by status.
    pub async fn count_by_status(&self, status: RequestStatus) -> Result<i64, LedgerError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM api_request WHERE status = $1
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }
}

#[async_trait]
impl RequestLedger for PostgresRequestLedger {
    async fn find_by_key(&self, key: &str) -> Result<Option<RequestRecord>, LedgerError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, business_txn_id, api_request_key, start_time, end_time, ver, api_url, status
            FROM api_request
            WHERE api_request_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_start(&self, record: &NewRequestRecord) -> Result<RequestRecord, LedgerError> {
        let result = sqlx::query_as::<_, RequestRecord>(
            r#"
            INSERT INTO api_request (business_txn_id, api_request_key, start_time, end_time, ver, api_url, status)
            VALUES ($1, $2, $3, NULL, 0, $4, $5)
            RETURNING id, business_txn_id, api_request_key, start_time, end_time, ver, api_url, status
            "#,
        )
        .bind(&record.business_txn_id)
        .bind(&record.api_request_key)
        .bind(record.start_time)
        .bind(&record.api_url)
        .bind(RequestStatus::Start)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(LedgerError::DuplicateKey(record.api_request_key.clone()))
            }
            Err(e) => Err(LedgerError::Unavailable(e)),
        }
    }

    async fn save(&self, record: &RequestRecord) -> Result<RequestRecord, LedgerError> {
        let row = sqlx::query_as::<_, RequestRecord>(
            r#"
            UPDATE api_request
            SET status = $2, end_time = $3, ver = $4
            WHERE id = $1
            RETURNING id, business_txn_id, api_request_key, start_time, end_time, ver, api_url, status
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.end_time)
        .bind(record.ver)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| LedgerError::NotFound(record.api_request_key.clone()))
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Process-local ledger with the same uniqueness guarantee as the table.
#[derive(Debug, Default)]
pub struct InMemoryRequestLedger {
    records: RwLock<HashMap<String, RequestRecord>>,
    next_id: AtomicI64,
}

impl InMemoryRequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn records(&self) -> Vec<RequestRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

#[async_trait]
impl RequestLedger for InMemoryRequestLedger {
    async fn find_by_key(&self, key: &str) -> Result<Option<RequestRecord>, LedgerError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn insert_start(&self, record: &NewRequestRecord) -> Result<RequestRecord, LedgerError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.api_request_key) {
            return Err(LedgerError::DuplicateKey(record.api_request_key.clone()));
        }

        let stored = RequestRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            business_txn_id: record.business_txn_id.clone(),
            api_request_key: record.api_request_key.clone(),
            start_time: Some(record.start_time),
            end_time: None,
            ver: 0,
            api_url: record.api_url.clone(),
            status: RequestStatus::Start,
        };
        records.insert(stored.api_request_key.clone(), stored.clone());

        Ok(stored)
    }

    async fn save(&self, record: &RequestRecord) -> Result<RequestRecord, LedgerError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.api_request_key) {
            Some(existing) if existing.id == record.id => {
                existing.status = record.status;
                existing.end_time = record.end_time;
                existing.ver = record.ver;
                Ok(existing.clone())
            }
            _ => Err(LedgerError::NotFound(record.api_request_key.clone())),
        }
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

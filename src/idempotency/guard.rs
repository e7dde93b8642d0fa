use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::idempotency::fault::{ErrorReporter, FaultResponse, HandlerFault, StatusMappingReporter};
use crate::idempotency::key_generator::{
    IdempotencyKey, IdempotencyKeyGenerator, KeyError, TransactionIds,
};
use crate::idempotency::storage::{
    LedgerError, NewRequestRecord, RequestLedger, RequestRecord, RequestStatus,
};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};

pub const DUPLICATE_REQUEST_MESSAGE: &str = "request has already been processed";
pub const LEDGER_UNAVAILABLE_MESSAGE: &str = "unable to verify request, please retry with a new transaction id";

/// In-process counters for guard decisions.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    pub total_requests: AtomicU64,
    pub admitted_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub rejected_requests: AtomicU64,
    pub completed_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub bookkeeping_failures: AtomicU64,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bookkeeping_failure(&self) {
        self.bookkeeping_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            admitted_requests: self.admitted_requests.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            completed_requests: self.completed_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            bookkeeping_failures: self.bookkeeping_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub duplicate_requests: u64,
    pub rejected_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub bookkeeping_failures: u64,
}

impl MetricsSnapshot {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.duplicate_requests as f64 / self.total_requests as f64
        }
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingHeader(String),
    InvalidHeader(String),
    DuplicateRequest,
    LedgerUnavailable(String),
}

impl RejectReason {
    /// Message returned to the client.
    pub fn message(&self) -> String {
        match self {
            RejectReason::MissingHeader(msg) | RejectReason::InvalidHeader(msg) => msg.clone(),
            RejectReason::DuplicateRequest => DUPLICATE_REQUEST_MESSAGE.to_string(),
            RejectReason::LedgerUnavailable(_) => LEDGER_UNAVAILABLE_MESSAGE.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingHeader(_) => "missing_header",
            RejectReason::InvalidHeader(_) => "invalid_header",
            RejectReason::DuplicateRequest => "duplicate",
            RejectReason::LedgerUnavailable(_) => "ledger_unavailable",
        }
    }
}

impl From<KeyError> for RejectReason {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::MissingHeader(_) => RejectReason::MissingHeader(err.to_string()),
            KeyError::HeaderTooLong { .. } => RejectReason::InvalidHeader(err.to_string()),
        }
    }
}

/// Proof that a request was admitted. Consumed by [`IdempotencyGuard::finish`].
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionToken {
    key: IdempotencyKey,
    business_txn_id: String,
    resource_path: String,
}

impl AdmissionToken {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    pub fn business_txn_id(&self) -> &str {
        &self.business_txn_id
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }
}

/// Terminal outcome recorded by [`IdempotencyGuard::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Fail,
}

impl From<Outcome> for RequestStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => RequestStatus::Success,
            Outcome::Fail => RequestStatus::Fail,
        }
    }
}

/// Result of running a request through the guard.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    Completed(Value),
    Rejected(RejectReason),
    Faulted(FaultResponse),
}

/// Collaborators injected into the guard.
#[derive(Clone)]
pub struct GuardDependencies {
    pub ledger: Arc<dyn RequestLedger>,
    pub error_reporter: Arc<dyn ErrorReporter>,
}

impl GuardDependencies {
    pub fn new(ledger: Arc<dyn RequestLedger>) -> Self {
        Self {
            ledger,
            error_reporter: Arc::new(StatusMappingReporter),
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }
}

/// Admits each idempotency key at most once and records its lifecycle.
pub struct IdempotencyGuard {
    ledger: Arc<dyn RequestLedger>,
    error_reporter: Arc<dyn ErrorReporter>,
    key_generator: IdempotencyKeyGenerator,
    metrics: Arc<GuardMetrics>,
}

impl IdempotencyGuard {
    pub fn new(deps: GuardDependencies) -> Self {
        Self {
            ledger: deps.ledger,
            error_reporter: deps.error_reporter,
            key_generator: IdempotencyKeyGenerator::new(),
            metrics: Arc::new(GuardMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<GuardMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ledger(&self) -> &Arc<dyn RequestLedger> {
        &self.ledger
    }

    /// Decides whether the request may run and records its start.
    ///
    /// The lookup only produces the early rejection. Two identical requests
    /// can both miss it; the ledger's unique key turns the losing insert into
    /// [`RejectReason::DuplicateRequest`].
    pub async fn admit(
        &self,
        resource_path: &str,
        ids: &TransactionIds,
    ) -> Result<AdmissionToken, RejectReason> {
        self.metrics.record_request();

        let key = match self.key_generator.derive_from(resource_path, ids) {
            Ok(key) => key,
            Err(e) => {
                tracing::info!(path = resource_path, "Rejecting request: {}", e);
                return Err(self.reject(e.into()));
            }
        };

        tracing::debug!(
            path = resource_path,
            txn_id = %mask_sensitive(ids.txn_id(), 2),
            business_txn_id = %mask_sensitive(ids.business_txn_id(), 2),
            "Checking api request ledger"
        );

        let timer = LatencyTimer::new();
        let existing = self.ledger.find_by_key(key.as_str()).await;
        get_metrics().record_ledger_latency("find", timer.elapsed_ms());

        match existing {
            Ok(Some(record)) => {
                tracing::warn!(
                    path = resource_path,
                    record_id = record.id,
                    status = record.status.as_str(),
                    "Duplicate request rejected"
                );
                return Err(self.reject(RejectReason::DuplicateRequest));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(path = resource_path, "Ledger lookup failed: {}", e);
                return Err(self.reject(RejectReason::LedgerUnavailable(e.to_string())));
            }
        }

        let business_txn_id = ids.business_txn_id().to_string();
        let start = NewRequestRecord::start(&key, &business_txn_id, resource_path);

        let timer = LatencyTimer::new();
        let inserted = self.ledger.insert_start(&start).await;
        get_metrics().record_ledger_latency("insert", timer.elapsed_ms());

        match inserted {
            Ok(record) => {
                self.metrics.record_admitted();
                get_metrics().record_admission();
                tracing::info!(path = resource_path, record_id = record.id, "Request admitted");

                Ok(AdmissionToken {
                    key,
                    business_txn_id,
                    resource_path: resource_path.to_string(),
                })
            }
            Err(LedgerError::DuplicateKey(_)) => {
                tracing::warn!(path = resource_path, "Duplicate request lost insert race");
                Err(self.reject(RejectReason::DuplicateRequest))
            }
            Err(e) => {
                tracing::error!(path = resource_path, "Failed to record request start: {}", e);
                Err(self.reject(RejectReason::LedgerUnavailable(e.to_string())))
            }
        }
    }

    /// Moves the admitted request to its terminal status.
    ///
    /// The caller waits for the ledger round trip, but failures are logged and
    /// swallowed so they never change the client response.
    pub async fn finish(&self, token: AdmissionToken, outcome: Outcome) {
        match self.record_end(&token, outcome).await {
            Ok(record) => {
                match record.status {
                    RequestStatus::Success => self.metrics.record_completed(),
                    RequestStatus::Fail => self.metrics.record_failed(),
                    RequestStatus::Start => {}
                }
                get_metrics().record_completion(record.status.as_str());
                tracing::info!(
                    path = token.resource_path(),
                    record_id = record.id,
                    status = record.status.as_str(),
                    "Request finished"
                );
            }
            Err(e) => {
                self.metrics.record_bookkeeping_failure();
                get_metrics().record_bookkeeping_failure("finish");
                tracing::error!(
                    path = token.resource_path(),
                    outcome = ?outcome,
                    "Failed to record request end: {}",
                    e
                );
            }
        }
    }

    async fn record_end(
        &self,
        token: &AdmissionToken,
        outcome: Outcome,
    ) -> Result<RequestRecord, LedgerError> {
        let timer = LatencyTimer::new();
        let mut record = self
            .ledger
            .find_by_key(token.key().as_str())
            .await?
            .ok_or_else(|| LedgerError::NotFound(token.key().to_string()))?;

        if record.status.is_terminal() {
            tracing::warn!(
                record_id = record.id,
                status = record.status.as_str(),
                "Request already finished, keeping recorded status"
            );
            return Ok(record);
        }

        record.complete(outcome.into(), Utc::now());
        let saved = self.ledger.save(&record).await;
        get_metrics().record_ledger_latency("save", timer.elapsed_ms());

        saved
    }

    /// Runs `handler` under the guard: admit, invoke, finish.
    ///
    /// The handler runs on its own task so a panic is contained here. On any
    /// fault the record is marked `Fail` before the error reporter is called.
    pub async fn execute<F, Fut>(&self, ctx: RequestContext, handler: F) -> GuardOutcome
    where
        F: FnOnce(RequestContext) -> Fut + Send,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let ids = ctx.transaction_ids();
        let token = match self.admit(&ctx.path, &ids).await {
            Ok(token) => token,
            Err(reason) => return GuardOutcome::Rejected(reason),
        };

        let fault = match tokio::spawn(handler(ctx.clone())).await {
            Ok(Ok(value)) => {
                self.finish(token, Outcome::Success).await;
                return GuardOutcome::Completed(value);
            }
            Ok(Err(api_error)) => HandlerFault::Error(api_error),
            Err(join_error) if join_error.is_panic() => {
                HandlerFault::from_panic(join_error.into_panic())
            }
            Err(_) => HandlerFault::Cancelled,
        };

        get_metrics().record_handler_fault(fault.kind());
        self.finish(token, Outcome::Fail).await;

        GuardOutcome::Faulted(self.error_reporter.report(&ctx, &fault))
    }

    fn reject(&self, reason: RejectReason) -> RejectReason {
        if reason == RejectReason::DuplicateRequest {
            self.metrics.record_duplicate();
        }
        self.metrics.record_rejected();
        get_metrics().record_rejection(reason.label());
        reason
    }
}

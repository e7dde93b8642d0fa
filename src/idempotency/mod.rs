pub mod fault;
pub mod guard;
pub mod key_generator;
pub mod storage;

pub use fault::{ErrorReporter, FaultResponse, HandlerFault, StatusMappingReporter};
pub use guard::{
    AdmissionToken, GuardDependencies, GuardMetrics, GuardOutcome, IdempotencyGuard,
    MetricsSnapshot, Outcome, RejectReason, DUPLICATE_REQUEST_MESSAGE, LEDGER_UNAVAILABLE_MESSAGE,
};
pub use key_generator::{
    IdempotencyKey, IdempotencyKeyGenerator, KeyError, TransactionIds, BUSINESS_TXN_ID_HEADER,
    MAX_TXN_ID_LEN, TXN_ID_HEADER,
};
pub use storage::{
    InMemoryRequestLedger, LedgerError, NewRequestRecord, PostgresRequestLedger, RequestLedger,
    RequestRecord, RequestStatus,
};

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Header carrying the client transaction id.
pub const TXN_ID_HEADER: &str = "s-txn-id";
/// Header carrying the business transaction id.
pub const BUSINESS_TXN_ID_HEADER: &str = "s-bus-txn-id";

/// Hex length of the resource path digest at the front of every key.
pub const PATH_DIGEST_LEN: usize = 64;

/// Longest accepted transaction id, in bytes. Keeps the full key well under
/// the Postgres btree entry limit on the unique index.
pub const MAX_TXN_ID_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("header {header} exceeds {max} bytes")]
    HeaderTooLong { header: &'static str, max: usize },
}

/// Deterministic identifier of one logical operation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Transaction identifiers supplied by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIds {
    pub txn_id: Option<String>,
    pub business_txn_id: Option<String>,
}

impl TransactionIds {
    pub fn new(txn_id: impl Into<String>, business_txn_id: impl Into<String>) -> Self {
        Self {
            txn_id: Some(txn_id.into()),
            business_txn_id: Some(business_txn_id.into()),
        }
    }

    /// Reads both ids from request headers. Non-UTF-8 values count as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            txn_id: read(TXN_ID_HEADER),
            business_txn_id: read(BUSINESS_TXN_ID_HEADER),
        }
    }

    pub fn txn_id(&self) -> &str {
        self.txn_id.as_deref().unwrap_or_default()
    }

    pub fn business_txn_id(&self) -> &str {
        self.business_txn_id.as_deref().unwrap_or_default()
    }
}

/// Derives idempotency keys as `sha256_hex(path) ++ txn_id ++ business_txn_id`.
///
/// Only the path is hashed. The transaction ids are appended raw so none of
/// their entropy is lost and keys stay readable when diffing ledger rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyKeyGenerator;

impl IdempotencyKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn derive(
        &self,
        resource_path: &str,
        txn_id: &str,
        business_txn_id: &str,
    ) -> Result<IdempotencyKey, KeyError> {
        if txn_id.is_empty() {
            return Err(KeyError::MissingHeader(TXN_ID_HEADER));
        }
        if business_txn_id.is_empty() {
            return Err(KeyError::MissingHeader(BUSINESS_TXN_ID_HEADER));
        }
        for (header, value) in [(TXN_ID_HEADER, txn_id), (BUSINESS_TXN_ID_HEADER, business_txn_id)] {
            if value.len() > MAX_TXN_ID_LEN {
                return Err(KeyError::HeaderTooLong {
                    header,
                    max: MAX_TXN_ID_LEN,
                });
            }
        }

        let mut key = path_digest(resource_path);
        key.reserve(txn_id.len() + business_txn_id.len());
        key.push_str(txn_id);
        key.push_str(business_txn_id);

        Ok(IdempotencyKey(key))
    }

    pub fn derive_from(
        &self,
        resource_path: &str,
        ids: &TransactionIds,
    ) -> Result<IdempotencyKey, KeyError> {
        self.derive(resource_path, ids.txn_id(), ids.business_txn_id())
    }
}

fn path_digest(resource_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_path.as_bytes());
    hex::encode(hasher.finalize())
}

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

/// Errors surfaced by every ledger operation.
///
/// A failing operation never leaves partial state behind: the transaction that
/// produced the error has already been rolled back when the caller sees it.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("bet was already accepted by another user")]
    AlreadyAccepted,

    #[error("distribution for contest {0} is already processed or in progress")]
    AlreadyProcessed(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("operation timed out, retry: {0}")]
    Timeout(String),

    #[error("internal ledger error: {0}")]
    Internal(String),
}

/// Stable, machine-readable error category handed to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    AlreadyAccepted,
    AlreadyProcessed,
    NotFound,
    InvalidStateTransition,
    Forbidden,
    Timeout,
    Internal,
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        LedgerError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::AlreadyAccepted => ErrorKind::AlreadyAccepted,
            LedgerError::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::Timeout(_) => ErrorKind::Timeout,
            LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Concurrency conflicts and timeouts can be retried after fetching fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AlreadyAccepted | ErrorKind::AlreadyProcessed | ErrorKind::Timeout
        )
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, _) = &err {
            match code.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return LedgerError::Timeout(format!("lock wait exceeded: {}", err));
                }
                ErrorCode::OperationInterrupted => {
                    return LedgerError::Timeout(format!("transaction budget exceeded: {}", err));
                }
                _ => {}
            }
        }
        LedgerError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(err: tokio::task::JoinError) -> Self {
        LedgerError::Internal(format!("store worker failed: {}", err))
    }
}

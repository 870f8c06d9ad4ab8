use crate::EntityClass;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = HistoryError> = std::result::Result<T, E>;

/// Why a query failed in a way the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The request deadline or the statement timeout expired.
    Timeout,
    /// The caller cancelled the request.
    Cancelled,
    /// No pooled connection became free within the acquire timeout.
    PoolExhausted,
    /// SQLite reported the database busy or locked.
    Busy,
    /// A bounded retry loop ran out of attempts.
    Exhausted,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransientKind::Timeout => "timeout",
            TransientKind::Cancelled => "cancelled",
            TransientKind::PoolExhausted => "pool exhausted",
            TransientKind::Busy => "database busy",
            TransientKind::Exhausted => "retries exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("no such {class}: {name:?}")]
    NotFound { class: EntityClass, name: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{kind}: {detail}")]
    Transient { kind: TransientKind, detail: String },
    #[error("store failure: {0}")]
    Fatal(String),
}

impl HistoryError {
    pub fn not_found(class: EntityClass, name: impl Into<String>) -> Self {
        HistoryError::NotFound { class, name: name.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        HistoryError::Validation(msg.into())
    }

    pub fn transient(kind: TransientKind, detail: impl Into<String>) -> Self {
        HistoryError::Transient { kind, detail: detail.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HistoryError::NotFound { .. })
    }

    /// Transient failures are the only ones worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HistoryError::Transient { .. })
    }

    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            HistoryError::Transient { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

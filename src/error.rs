use thiserror::Error;

use crate::http::CallFailure;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote call failed: {0}")]
    Call(#[from] RetryError<CallFailure>),

    #[error("Batch {batch}/{total} failed: {source}")]
    BatchFailed {
        batch: usize,
        total: usize,
        #[source]
        source: RetryError<CallFailure>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Config(_) => FailureKind::Configuration,
            JobError::Call(_) | JobError::BatchFailed { .. } => FailureKind::BudgetExhausted,
            JobError::Store(_) | JobError::Io(_) | JobError::Json(_) => FailureKind::Source,
        }
    }

    /// HTTP status of the last failed attempt, when there was one.
    pub fn status(&self) -> Option<u16> {
        self.last_call().and_then(|f| f.value.status())
    }

    /// Duration of the last failed attempt, when there was one.
    pub fn duration_ms(&self) -> Option<u64> {
        self.last_call().map(|f| f.duration_ms)
    }

    fn last_call(&self) -> Option<&CallFailure> {
        match self {
            JobError::Call(e) | JobError::BatchFailed { source: e, .. } => Some(&e.last),
            _ => None,
        }
    }
}

/// Terminal failure of a retry sequence, carrying the last attempt's cause.
#[derive(Debug, Error)]
#[error("retries exhausted after {attempts} attempt(s): {last}")]
pub struct RetryError<E> {
    pub attempts: u32,
    #[source]
    pub last: E,
}

/// Classifies a job failure for the terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Invalid or missing configuration; no attempt was made.
    Configuration,
    /// Every attempt against the remote endpoint failed.
    BudgetExhausted,
    /// The work-item source could not be read.
    Source,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "Configuration"),
            FailureKind::BudgetExhausted => write!(f, "BudgetExhausted"),
            FailureKind::Source => write!(f, "Source"),
        }
    }
}

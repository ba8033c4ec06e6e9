//! Typed failures returned by the lifecycle operations

use thiserror::Error;

use super::lifecycle::InvalidTransition;
use crate::id::IdError;

/// Rule violations detected after reading the loan. Nothing was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusinessError {
    #[error("loan not found")]
    NotFound,

    #[error("loan already approved")]
    AlreadyApproved,

    #[error("loan already invested")]
    AlreadyInvested,

    #[error("loan not approved")]
    NotApproved,

    #[error("loan not invested")]
    NotInvested,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("identifier {0} does not fit the storage column")]
    IdOutOfRange(u64),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("write affected no rows: {0}")]
    NothingWritten(String),

    #[error("invested amount of loan {0} would overflow")]
    AmountOverflow(u64),
}

/// Error returned by every `LoanService` operation
#[derive(Error, Debug)]
pub enum LoanError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Business(#[from] BusinessError),

    /// Detail is logged where the failure happens; callers only see the summary
    #[error("server error: {0}")]
    Server(String),
}

impl LoanError {
    pub fn is_business(&self) -> bool {
        matches!(self, LoanError::Business(_))
    }

    pub fn business(&self) -> Option<&BusinessError> {
        match self {
            LoanError::Business(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LoanError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "loan store failure");
        LoanError::Server("failed to access loan store".to_string())
    }
}

impl From<IdError> for LoanError {
    fn from(err: IdError) -> Self {
        tracing::error!(error = %err, "identifier generation failure");
        LoanError::Server("failed to generate identifier".to_string())
    }
}

impl From<validator::ValidationErrors> for LoanError {
    fn from(err: validator::ValidationErrors) -> Self {
        LoanError::Validation(err.to_string())
    }
}

impl From<InvalidTransition> for LoanError {
    fn from(err: InvalidTransition) -> Self {
        LoanError::Business(BusinessError::InvalidTransition(err))
    }
}

pub type LoanResult<T> = Result<T, LoanError>;

//! Error types for Biblis server

use thiserror::Error;

use crate::models::{BookCategory, CopyId, LoanId};

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No member with email {0}")]
    MemberNotFound(String),

    #[error("No copy with id {0}")]
    CopyNotFound(CopyId),

    #[error("No loan with id {0}")]
    LoanNotFound(LoanId),

    /// Another transaction holds the copy's row lock. Transient: the caller
    /// may retry with backoff once the competing grant finishes.
    #[error("Copy {0} is locked by a concurrent request")]
    LockUnavailable(CopyId),

    #[error("Copy {0} is already on loan")]
    AlreadyLoaned(CopyId),

    #[error("Loan limit reached for category {category} (max {max})")]
    LimitReached { category: BookCategory, max: u32 },

    #[error("Loan {0} belongs to another member")]
    NotOwner(LoanId),

    #[error("Loan {0} was already returned")]
    AlreadyReturned(LoanId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same call can succeed without any state change
    /// in between. Only lock contention qualifies; every other rejection is
    /// stable until the underlying data changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::LockUnavailable(_))
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

//! Repository layer for circulation storage
//!
//! Two implementations share the same contract: [`postgres`] for production
//! and [`memory`] for tests and local development. Services only ever see
//! the traits.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{BookCategory, BookCopy, BookId, CopyId, DueSoonNotice, Loan, LoanId, Member, MemberId},
};

/// Operations scoped to one storage transaction.
///
/// Dropping a transaction without calling [`commit`](CirculationTx::commit)
/// rolls back every write and releases any row lock taken through it.
#[async_trait]
pub trait CirculationTx: Send {
    /// Look up a member by email (case-insensitive).
    async fn member_by_email(&mut self, email: &str) -> AppResult<Option<Member>>;

    /// Look up a member by id.
    async fn member_by_id(&mut self, id: MemberId) -> AppResult<Option<Member>>;

    /// Fetch a copy under an exclusive row lock with zero wait.
    ///
    /// Returns `Ok(None)` when the copy does not exist. When another
    /// transaction already holds the lock this fails immediately with
    /// [`AppError::LockUnavailable`](crate::error::AppError::LockUnavailable)
    /// instead of blocking. The lock is held until commit or rollback. A
    /// lock failure aborts the underlying Postgres transaction, so the
    /// transaction must be discarded after it.
    async fn copy_for_update(&mut self, id: CopyId) -> AppResult<Option<BookCopy>>;

    /// Category of the given catalog item.
    async fn book_category(&mut self, id: BookId) -> AppResult<BookCategory>;

    /// Whether any active loan references the copy.
    async fn active_loan_exists(&mut self, copy_id: CopyId) -> AppResult<bool>;

    /// Number of active loans the member holds in the given category.
    async fn active_loan_count(
        &mut self,
        member_id: MemberId,
        category: BookCategory,
    ) -> AppResult<i64>;

    /// Insert a new loan row and return it.
    async fn insert_loan(
        &mut self,
        member_id: MemberId,
        copy_id: CopyId,
        loaned_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan>;

    /// Point the copy at its active loan.
    async fn set_current_loan(&mut self, copy_id: CopyId, loan_id: LoanId) -> AppResult<()>;

    /// Look up a loan by id.
    async fn loan_by_id(&mut self, id: LoanId) -> AppResult<Option<Loan>>;

    /// Record the return instant, but only if the loan is still open.
    /// Returns false when the loan was already returned (or does not exist);
    /// the conditional write is the serialization point for returns.
    async fn mark_returned(&mut self, loan_id: LoanId, returned_at: DateTime<Utc>)
        -> AppResult<bool>;

    /// Clear the copy's loan pointer, but only if it still references the
    /// given loan. Returns whether the pointer was cleared.
    async fn clear_current_loan_if_owner(
        &mut self,
        copy_id: CopyId,
        loan_id: LoanId,
    ) -> AppResult<bool>;

    /// Commit every write performed through this transaction.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Pool-scoped circulation storage.
#[async_trait]
pub trait CirculationRepository: Send + Sync {
    /// Open a transaction for the loan allocator.
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>>;

    /// Look up a member by email (case-insensitive).
    async fn member_by_email(&self, email: &str) -> AppResult<Option<Member>>;

    /// All loans of a member, active first, then by due date ascending.
    async fn loans_for_member(&self, member_id: MemberId) -> AppResult<Vec<Loan>>;

    /// One page of active, unnotified loans due inside
    /// `[window_start, window_end)`, restricted to `id > after_id` and
    /// ordered by id ascending. The stable id ordering is what lets the
    /// batch resume mid-window without repeats.
    async fn due_soon_notices(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        after_id: LoanId,
        limit: i64,
    ) -> AppResult<Vec<DueSoonNotice>>;

    /// Stamp `due_notice_sent_at = now` on the given loans in one statement,
    /// skipping rows that were returned or already stamped in the meantime.
    /// Returns the number of rows actually updated.
    async fn mark_notices_sent(&self, now: DateTime<Utc>, loan_ids: &[LoanId]) -> AppResult<u64>;
}

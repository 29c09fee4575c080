//! Loan allocation service

use std::sync::Arc;

use chrono::Duration;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{CopyId, Loan, LoanId},
    repository::CirculationRepository,
    services::limits::LoanLimits,
};

/// Fixed loan window, applied at grant time.
pub const LOAN_PERIOD_DAYS: i64 = 30;

#[derive(Clone)]
pub struct LoansService {
    repository: Arc<dyn CirculationRepository>,
    limits: LoanLimits,
    clock: Arc<dyn Clock>,
}

impl LoansService {
    pub fn new(
        repository: Arc<dyn CirculationRepository>,
        limits: LoanLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            limits,
            clock,
        }
    }

    /// Grant exclusive custody of a copy to the member identified by email.
    ///
    /// The copy row is locked with zero wait for the whole transaction, so
    /// under concurrent requests exactly one caller wins; the rest fail fast
    /// with `LockUnavailable` or, once the winner committed, `AlreadyLoaned`.
    /// Every early return drops the transaction, which rolls it back.
    pub async fn grant_loan(&self, copy_id: CopyId, member_email: &str) -> AppResult<Loan> {
        let mut tx = self.repository.begin().await?;

        let member = tx
            .member_by_email(member_email)
            .await?
            .ok_or_else(|| AppError::MemberNotFound(member_email.to_string()))?;

        let copy = tx
            .copy_for_update(copy_id)
            .await?
            .ok_or(AppError::CopyNotFound(copy_id))?;

        // Availability is re-checked under the lock. The loan table is
        // authoritative; a set pointer alone also rejects, so a copy whose
        // pointer drifted fails closed instead of being double-loaned.
        if copy.current_loan_id.is_some() || tx.active_loan_exists(copy_id).await? {
            return Err(AppError::AlreadyLoaned(copy_id));
        }

        let category = tx.book_category(copy.book_id).await?;
        let active = tx.active_loan_count(member.id, category).await?;
        self.limits.check(category, active)?;

        let now = self.clock.now();
        let loan = tx
            .insert_loan(member.id, copy_id, now, now + Duration::days(LOAN_PERIOD_DAYS))
            .await?;
        tx.set_current_loan(copy_id, loan.id).await?;
        tx.commit().await?;

        tracing::info!(
            loan_id = loan.id,
            copy_id,
            member_id = member.id,
            due_at = %loan.due_at,
            "loan granted"
        );

        Ok(loan)
    }

    /// Record the return of a loan on behalf of the member identified by
    /// email. Only the borrowing member may return a loan.
    pub async fn return_loan(&self, loan_id: LoanId, member_email: &str) -> AppResult<Loan> {
        let mut tx = self.repository.begin().await?;

        let loan = tx
            .loan_by_id(loan_id)
            .await?
            .ok_or(AppError::LoanNotFound(loan_id))?;

        let borrower = tx.member_by_id(loan.member_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Loan {} references missing member", loan_id))
        })?;
        if !borrower.email.eq_ignore_ascii_case(member_email) {
            return Err(AppError::NotOwner(loan_id));
        }

        if loan.returned_at.is_some() {
            return Err(AppError::AlreadyReturned(loan_id));
        }

        let now = self.clock.now();
        // The conditional update is the serialization point: if another
        // request returned the loan in the meantime, zero rows match.
        if !tx.mark_returned(loan_id, now).await? {
            return Err(AppError::AlreadyReturned(loan_id));
        }
        let cleared = tx.clear_current_loan_if_owner(loan.copy_id, loan_id).await?;
        tx.commit().await?;

        if !cleared {
            tracing::warn!(
                loan_id,
                copy_id = loan.copy_id,
                "copy pointer did not reference the returned loan"
            );
        }
        tracing::info!(loan_id, copy_id = loan.copy_id, "loan returned");

        Ok(Loan {
            returned_at: Some(now),
            ..loan
        })
    }

    /// All loans of a member, open ones first, then past loans by most
    /// recent return.
    pub async fn loans_for_member(&self, member_email: &str) -> AppResult<Vec<Loan>> {
        let member = self
            .repository
            .member_by_email(member_email)
            .await?
            .ok_or_else(|| AppError::MemberNotFound(member_email.to_string()))?;

        self.repository.loans_for_member(member.id).await
    }
}

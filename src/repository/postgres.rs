//! PostgreSQL circulation repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{BookCategory, BookCopy, BookId, CopyId, DueSoonNotice, Loan, LoanId, Member, MemberId},
    repository::{CirculationRepository, CirculationTx},
};

/// Postgres SQLSTATE raised by `FOR UPDATE NOWAIT` on a contended row.
const LOCK_NOT_AVAILABLE: &str = "55P03";

#[derive(Clone)]
pub struct PostgresCirculationRepository {
    pool: Pool<Postgres>,
}

impl PostgresCirculationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CirculationRepository for PostgresCirculationRepository {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresCirculationTx { tx }))
    }

    async fn member_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(
            "SELECT * FROM members WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    async fn loans_for_member(&self, member_id: MemberId) -> AppResult<Vec<Loan>> {
        // DESC puts NULLs first, so open loans sort ahead of returned ones.
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE member_id = $1
            ORDER BY returned_at DESC, due_at ASC
            "#,
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(loans)
    }

    async fn due_soon_notices(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        after_id: LoanId,
        limit: i64,
    ) -> AppResult<Vec<DueSoonNotice>> {
        let notices = sqlx::query_as::<_, DueSoonNotice>(
            r#"
            SELECT l.id AS loan_id, m.email AS member_email, b.title AS book_title, l.due_at
            FROM loans l
            JOIN members m ON m.id = l.member_id
            JOIN book_copies c ON c.id = l.copy_id
            JOIN books b ON b.id = c.book_id
            WHERE l.returned_at IS NULL
              AND l.due_notice_sent_at IS NULL
              AND l.due_at >= $1 AND l.due_at < $2
              AND l.id > $3
            ORDER BY l.id
            LIMIT $4
            "#,
        )
        .bind(window_start)
        .bind(window_end)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notices)
    }

    async fn mark_notices_sent(&self, now: DateTime<Utc>, loan_ids: &[LoanId]) -> AppResult<u64> {
        if loan_ids.is_empty() {
            return Ok(0);
        }

        // The re-checks make a retried page idempotent: rows returned or
        // stamped since the scan are skipped.
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET due_notice_sent_at = $1
            WHERE id = ANY($2)
              AND returned_at IS NULL
              AND due_notice_sent_at IS NULL
            "#,
        )
        .bind(now)
        .bind(loan_ids.to_vec())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

struct PostgresCirculationTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CirculationTx for PostgresCirculationTx {
    async fn member_by_email(&mut self, email: &str) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(
            "SELECT * FROM members WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(member)
    }

    async fn member_by_id(&mut self, id: MemberId) -> AppResult<Option<Member>> {
        let member = sqlx::query_as::<_, Member>("SELECT * FROM members WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(member)
    }

    async fn copy_for_update(&mut self, id: CopyId) -> AppResult<Option<BookCopy>> {
        let copy = sqlx::query_as::<_, BookCopy>(
            "SELECT * FROM book_copies WHERE id = $1 FOR UPDATE NOWAIT",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                AppError::LockUnavailable(id)
            }
            _ => AppError::Database(err),
        })?;

        Ok(copy)
    }

    async fn book_category(&mut self, id: BookId) -> AppResult<BookCategory> {
        sqlx::query_scalar::<_, BookCategory>("SELECT category FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Referenced book {} not found", id)))
    }

    async fn active_loan_exists(&mut self, copy_id: CopyId) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM loans WHERE copy_id = $1 AND returned_at IS NULL)",
        )
        .bind(copy_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn active_loan_count(
        &mut self,
        member_id: MemberId,
        category: BookCategory,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM loans l
            JOIN book_copies c ON c.id = l.copy_id
            JOIN books b ON b.id = c.book_id
            WHERE l.member_id = $1
              AND l.returned_at IS NULL
              AND b.category = $2
            "#,
        )
        .bind(member_id)
        .bind(category)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn insert_loan(
        &mut self,
        member_id: MemberId,
        copy_id: CopyId,
        loaned_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (member_id, copy_id, loaned_at, due_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(member_id)
        .bind(copy_id)
        .bind(loaned_at)
        .bind(due_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(loan)
    }

    async fn set_current_loan(&mut self, copy_id: CopyId, loan_id: LoanId) -> AppResult<()> {
        sqlx::query("UPDATE book_copies SET current_loan_id = $2 WHERE id = $1")
            .bind(copy_id)
            .bind(loan_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn loan_by_id(&mut self, id: LoanId) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(loan)
    }

    async fn mark_returned(
        &mut self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE loans SET returned_at = $2 WHERE id = $1 AND returned_at IS NULL",
        )
        .bind(loan_id)
        .bind(returned_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_current_loan_if_owner(
        &mut self,
        copy_id: CopyId,
        loan_id: LoanId,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE book_copies SET current_loan_id = NULL WHERE id = $1 AND current_loan_id = $2",
        )
        .bind(copy_id)
        .bind(loan_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

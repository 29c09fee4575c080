//! Loan (borrow) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{CopyId, LoanId, MemberId};

/// A loan row. Created only by the allocator under the copy's row lock,
/// mutated once by return (`returned_at`) and at most once by the due-notice
/// batch (`due_notice_sent_at`); never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: LoanId,
    pub member_id: MemberId,
    pub copy_id: CopyId,
    pub loaned_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub due_notice_sent_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// A loan is active until a return is recorded.
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

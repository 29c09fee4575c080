//! Due-soon notice read model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LoanId;

/// Projection row scanned by the due-notice batch: everything a notifier
/// needs, joined in one query so the batch never loads full entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DueSoonNotice {
    pub loan_id: LoanId,
    pub member_email: String,
    pub book_title: String,
    pub due_at: DateTime<Utc>,
}

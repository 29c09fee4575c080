//! Physical copy model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{BookId, CopyId, LibraryId, LoanId};

/// One physical, independently loanable instance of a catalog item.
///
/// `current_loan_id` is a denormalized pointer to the active loan: set when
/// a loan is granted, cleared when that same loan is returned. The loan table
/// is authoritative; a copy whose pointer disagrees with the table is treated
/// as unavailable until reconciled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BookCopy {
    pub id: CopyId,
    pub book_id: BookId,
    pub library_id: LibraryId,
    pub shelf_location: Option<String>,
    pub current_loan_id: Option<LoanId>,
}

impl BookCopy {
    /// Availability as seen through the pointer alone. Grant decisions also
    /// consult the loan table under the row lock.
    pub fn is_available(&self) -> bool {
        self.current_loan_id.is_none()
    }
}

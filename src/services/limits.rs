//! Loan limit policy

use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::BookCategory,
};

/// Per-member caps on concurrent active loans, one per category. The maxima
/// are operational tuning knobs carried in configuration, not domain truths;
/// the `limits` config section deserializes straight into this type.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LoanLimits {
    pub max_books: u32,
    pub max_publications: u32,
}

impl LoanLimits {
    pub fn max_for(&self, category: BookCategory) -> u32 {
        match category {
            BookCategory::Book => self.max_books,
            BookCategory::Publication => self.max_publications,
        }
    }

    /// Pure decision: may a member already holding `active_count` loans in
    /// the category take one more?
    pub fn allows(&self, category: BookCategory, active_count: i64) -> bool {
        active_count < i64::from(self.max_for(category))
    }

    pub fn check(&self, category: BookCategory, active_count: i64) -> AppResult<()> {
        if self.allows(category, active_count) {
            Ok(())
        } else {
            Err(AppError::LimitReached {
                category,
                max: self.max_for(category),
            })
        }
    }
}

impl Default for LoanLimits {
    fn default() -> Self {
        Self {
            max_books: 5,
            max_publications: 10,
        }
    }
}

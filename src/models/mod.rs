//! Data models for Biblis

pub mod book;
pub mod copy;
pub mod library;
pub mod loan;
pub mod member;
pub mod notice;

// Re-export commonly used types
pub use book::{Book, BookCategory};
pub use copy::BookCopy;
pub use library::Library;
pub use loan::Loan;
pub use member::{Member, MemberRole};
pub use notice::DueSoonNotice;

// Entity identifiers (BIGSERIAL columns)
pub type LibraryId = i64;
pub type BookId = i64;
pub type CopyId = i64;
pub type LoanId = i64;
pub type MemberId = i64;

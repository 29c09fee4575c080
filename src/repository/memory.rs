//! In-memory circulation repository for tests and local development

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        Book, BookCategory, BookCopy, BookId, CopyId, DueSoonNotice, Library, LibraryId, Loan,
        LoanId, Member, MemberId, MemberRole,
    },
    repository::{CirculationRepository, CirculationTx},
};

#[derive(Default)]
struct State {
    libraries: HashMap<LibraryId, Library>,
    books: HashMap<BookId, Book>,
    copies: HashMap<CopyId, BookCopy>,
    members: HashMap<MemberId, Member>,
    loans: BTreeMap<LoanId, Loan>,
    /// Copies currently row-locked by an open transaction.
    locked_copies: HashSet<CopyId>,
}

struct Shared {
    state: Mutex<State>,
    id_sequence: AtomicI64,
}

/// Stores everything in process memory while honoring the same transaction
/// and locking contract as the Postgres repository: `copy_for_update` takes
/// a per-copy try-lock held until commit or drop, and dropping a transaction
/// without committing reverses its writes.
pub struct InMemoryCirculationRepository {
    shared: Arc<Shared>,
}

impl InMemoryCirculationRepository {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                id_sequence: AtomicI64::new(1),
            }),
        }
    }

    fn next_id(&self) -> i64 {
        self.shared.id_sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_library(&self, name: &str) -> LibraryId {
        let id = self.next_id();
        self.shared.state.lock().libraries.insert(
            id,
            Library {
                id,
                name: name.to_string(),
                address: None,
            },
        );
        id
    }

    pub fn add_book(&self, title: &str, category: BookCategory) -> BookId {
        let id = self.next_id();
        self.shared.state.lock().books.insert(
            id,
            Book {
                id,
                title: title.to_string(),
                author: None,
                publication_year: None,
                category,
            },
        );
        id
    }

    pub fn add_member(&self, name: &str, email: &str) -> MemberId {
        let id = self.next_id();
        self.shared.state.lock().members.insert(
            id,
            Member {
                id,
                name: name.to_string(),
                email: email.to_string(),
                role: MemberRole::Member,
            },
        );
        id
    }

    pub fn add_copy(&self, book_id: BookId, library_id: LibraryId) -> CopyId {
        let id = self.next_id();
        self.shared.state.lock().copies.insert(
            id,
            BookCopy {
                id,
                book_id,
                library_id,
                shelf_location: None,
                current_loan_id: None,
            },
        );
        id
    }

    /// Seed an active loan directly, pointer included, bypassing the
    /// allocator. Lets tests stage loans with arbitrary due dates.
    pub fn add_loan(
        &self,
        member_id: MemberId,
        copy_id: CopyId,
        loaned_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> LoanId {
        let id = self.next_id();
        let mut state = self.shared.state.lock();
        state.loans.insert(
            id,
            Loan {
                id,
                member_id,
                copy_id,
                loaned_at,
                due_at,
                returned_at: None,
                due_notice_sent_at: None,
            },
        );
        if let Some(copy) = state.copies.get_mut(&copy_id) {
            copy.current_loan_id = Some(id);
        }
        id
    }

    /// Force the copy's loan pointer, letting tests stage the drifted states
    /// the allocator must fail closed on.
    pub fn set_copy_pointer(&self, copy_id: CopyId, loan_id: Option<LoanId>) {
        if let Some(copy) = self.shared.state.lock().copies.get_mut(&copy_id) {
            copy.current_loan_id = loan_id;
        }
    }

    pub fn loan(&self, id: LoanId) -> Option<Loan> {
        self.shared.state.lock().loans.get(&id).cloned()
    }

    pub fn copy(&self, id: CopyId) -> Option<BookCopy> {
        self.shared.state.lock().copies.get(&id).cloned()
    }
}

impl Default for InMemoryCirculationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CirculationRepository for InMemoryCirculationRepository {
    async fn begin(&self) -> AppResult<Box<dyn CirculationTx>> {
        Ok(Box::new(InMemoryTx {
            shared: self.shared.clone(),
            locked: Vec::new(),
            undo: Vec::new(),
            committed: false,
        }))
    }

    async fn member_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        Ok(find_member_by_email(&self.shared.state.lock(), email))
    }

    async fn loans_for_member(&self, member_id: MemberId) -> AppResult<Vec<Loan>> {
        let state = self.shared.state.lock();
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.member_id == member_id)
            .cloned()
            .collect();
        // Open loans first (NULL return sorts ahead), then by due date.
        loans.sort_by(|a, b| match (a.returned_at, b.returned_at) {
            (None, None) => a.due_at.cmp(&b.due_at),
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.due_at.cmp(&b.due_at)),
        });
        Ok(loans)
    }

    async fn due_soon_notices(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        after_id: LoanId,
        limit: i64,
    ) -> AppResult<Vec<DueSoonNotice>> {
        let state = self.shared.state.lock();
        let mut page = Vec::new();

        for (id, loan) in state.loans.range((Bound::Excluded(after_id), Bound::Unbounded)) {
            if page.len() as i64 >= limit {
                break;
            }
            if loan.returned_at.is_some() || loan.due_notice_sent_at.is_some() {
                continue;
            }
            if loan.due_at < window_start || loan.due_at >= window_end {
                continue;
            }

            let member = state.members.get(&loan.member_id).ok_or_else(|| {
                AppError::Internal(format!("Loan {} references missing member", id))
            })?;
            let book = state
                .copies
                .get(&loan.copy_id)
                .and_then(|c| state.books.get(&c.book_id))
                .ok_or_else(|| {
                    AppError::Internal(format!("Loan {} references missing book", id))
                })?;

            page.push(DueSoonNotice {
                loan_id: *id,
                member_email: member.email.clone(),
                book_title: book.title.clone(),
                due_at: loan.due_at,
            });
        }

        Ok(page)
    }

    async fn mark_notices_sent(&self, now: DateTime<Utc>, loan_ids: &[LoanId]) -> AppResult<u64> {
        let mut state = self.shared.state.lock();
        let mut marked = 0;

        for id in loan_ids {
            if let Some(loan) = state.loans.get_mut(id) {
                if loan.returned_at.is_none() && loan.due_notice_sent_at.is_none() {
                    loan.due_notice_sent_at = Some(now);
                    marked += 1;
                }
            }
        }

        Ok(marked)
    }
}

fn find_member_by_email(state: &State, email: &str) -> Option<Member> {
    state
        .members
        .values()
        .find(|m| m.email.eq_ignore_ascii_case(email))
        .cloned()
}

enum Undo {
    InsertLoan(LoanId),
    SetPointer {
        copy_id: CopyId,
        previous: Option<LoanId>,
    },
    MarkReturned(LoanId),
}

/// Writes apply eagerly under the state mutex; the undo log reverses them
/// when the transaction is dropped without commit.
struct InMemoryTx {
    shared: Arc<Shared>,
    locked: Vec<CopyId>,
    undo: Vec<Undo>,
    committed: bool,
}

#[async_trait]
impl CirculationTx for InMemoryTx {
    async fn member_by_email(&mut self, email: &str) -> AppResult<Option<Member>> {
        Ok(find_member_by_email(&self.shared.state.lock(), email))
    }

    async fn member_by_id(&mut self, id: MemberId) -> AppResult<Option<Member>> {
        Ok(self.shared.state.lock().members.get(&id).cloned())
    }

    async fn copy_for_update(&mut self, id: CopyId) -> AppResult<Option<BookCopy>> {
        let mut state = self.shared.state.lock();

        let copy = match state.copies.get(&id) {
            Some(copy) => copy.clone(),
            None => return Ok(None),
        };

        if !self.locked.contains(&id) {
            if state.locked_copies.contains(&id) {
                return Err(AppError::LockUnavailable(id));
            }
            state.locked_copies.insert(id);
            self.locked.push(id);
        }

        Ok(Some(copy))
    }

    async fn book_category(&mut self, id: BookId) -> AppResult<BookCategory> {
        self.shared
            .state
            .lock()
            .books
            .get(&id)
            .map(|b| b.category)
            .ok_or_else(|| AppError::Internal(format!("Referenced book {} not found", id)))
    }

    async fn active_loan_exists(&mut self, copy_id: CopyId) -> AppResult<bool> {
        Ok(self
            .shared
            .state
            .lock()
            .loans
            .values()
            .any(|l| l.copy_id == copy_id && l.returned_at.is_none()))
    }

    async fn active_loan_count(
        &mut self,
        member_id: MemberId,
        category: BookCategory,
    ) -> AppResult<i64> {
        let state = self.shared.state.lock();
        let count = state
            .loans
            .values()
            .filter(|l| l.member_id == member_id && l.returned_at.is_none())
            .filter(|l| {
                state
                    .copies
                    .get(&l.copy_id)
                    .and_then(|c| state.books.get(&c.book_id))
                    .map(|b| b.category == category)
                    .unwrap_or(false)
            })
            .count();

        Ok(count as i64)
    }

    async fn insert_loan(
        &mut self,
        member_id: MemberId,
        copy_id: CopyId,
        loaned_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let id = self.shared.id_sequence.fetch_add(1, Ordering::Relaxed);
        let loan = Loan {
            id,
            member_id,
            copy_id,
            loaned_at,
            due_at,
            returned_at: None,
            due_notice_sent_at: None,
        };

        self.shared.state.lock().loans.insert(id, loan.clone());
        self.undo.push(Undo::InsertLoan(id));

        Ok(loan)
    }

    async fn set_current_loan(&mut self, copy_id: CopyId, loan_id: LoanId) -> AppResult<()> {
        let mut state = self.shared.state.lock();
        let copy = state
            .copies
            .get_mut(&copy_id)
            .ok_or(AppError::CopyNotFound(copy_id))?;

        self.undo.push(Undo::SetPointer {
            copy_id,
            previous: copy.current_loan_id,
        });
        copy.current_loan_id = Some(loan_id);

        Ok(())
    }

    async fn loan_by_id(&mut self, id: LoanId) -> AppResult<Option<Loan>> {
        Ok(self.shared.state.lock().loans.get(&id).cloned())
    }

    async fn mark_returned(
        &mut self,
        loan_id: LoanId,
        returned_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.shared.state.lock();
        match state.loans.get_mut(&loan_id) {
            Some(loan) if loan.returned_at.is_none() => {
                loan.returned_at = Some(returned_at);
                self.undo.push(Undo::MarkReturned(loan_id));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_current_loan_if_owner(
        &mut self,
        copy_id: CopyId,
        loan_id: LoanId,
    ) -> AppResult<bool> {
        let mut state = self.shared.state.lock();
        match state.copies.get_mut(&copy_id) {
            Some(copy) if copy.current_loan_id == Some(loan_id) => {
                self.undo.push(Undo::SetPointer {
                    copy_id,
                    previous: copy.current_loan_id,
                });
                copy.current_loan_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(mut self: Box<Self>) -> AppResult<()> {
        self.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if !self.committed {
            for undo in self.undo.drain(..).rev() {
                match undo {
                    Undo::InsertLoan(id) => {
                        state.loans.remove(&id);
                    }
                    Undo::SetPointer { copy_id, previous } => {
                        if let Some(copy) = state.copies.get_mut(&copy_id) {
                            copy.current_loan_id = previous;
                        }
                    }
                    Undo::MarkReturned(loan_id) => {
                        if let Some(loan) = state.loans.get_mut(&loan_id) {
                            loan.returned_at = None;
                        }
                    }
                }
            }
        }
        for copy_id in self.locked.drain(..) {
            state.locked_copies.remove(&copy_id);
        }
    }
}

#[cfg(test)]
mod tests_in_memory_circulation_repository {
    use chrono::{Duration, TimeZone};
    use tokio_test::assert_ok;

    use super::*;

    fn seeded_copy(repository: &InMemoryCirculationRepository) -> CopyId {
        let library_id = repository.add_library("Central");
        let book_id = repository.add_book("Clean Code", BookCategory::Book);
        repository.add_copy(book_id, library_id)
    }

    /// Lock contract of copy_for_update
    /// 1. Missing copy comes back as None without taking a lock
    /// 2. First transaction locks the copy
    /// 3. Second transaction fails fast with LockUnavailable and is discarded
    /// 4. Re-locking inside the same transaction succeeds
    /// 5. Dropping the first transaction releases the lock
    #[tokio::test]
    async fn test_copy_try_lock() {
        let repository = InMemoryCirculationRepository::new();
        let copy_id = seeded_copy(&repository);

        let mut tx1 = repository.begin().await.unwrap();
        assert!(tx1.copy_for_update(copy_id + 100).await.unwrap().is_none());
        assert!(tx1.copy_for_update(copy_id).await.unwrap().is_some());

        let mut tx2 = repository.begin().await.unwrap();
        let contended = tx2.copy_for_update(copy_id).await;
        assert!(matches!(contended, Err(AppError::LockUnavailable(id)) if id == copy_id));
        drop(tx2);

        // Same transaction may touch its own lock again.
        assert!(tx1.copy_for_update(copy_id).await.unwrap().is_some());

        drop(tx1);
        let mut tx3 = repository.begin().await.unwrap();
        assert_ok!(tx3.copy_for_update(copy_id).await);
    }

    /// Rollback semantics
    /// 1. Transaction inserts a loan and points the copy at it
    /// 2. Dropping without commit removes the loan and restores the pointer
    /// 3. A committed transaction keeps its writes
    #[tokio::test]
    async fn test_rollback_reverses_writes() {
        let repository = InMemoryCirculationRepository::new();
        let copy_id = seeded_copy(&repository);
        let member_id = repository.add_member("Alice", "alice@example.com");

        let loaned_at = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let due_at = loaned_at + Duration::days(30);

        let loan_id = {
            let mut tx = repository.begin().await.unwrap();
            let loan = tx
                .insert_loan(member_id, copy_id, loaned_at, due_at)
                .await
                .unwrap();
            tx.set_current_loan(copy_id, loan.id).await.unwrap();
            loan.id
            // dropped here without commit
        };

        assert!(repository.loan(loan_id).is_none());
        assert_eq!(repository.copy(copy_id).unwrap().current_loan_id, None);

        let mut tx = repository.begin().await.unwrap();
        let loan = tx
            .insert_loan(member_id, copy_id, loaned_at, due_at)
            .await
            .unwrap();
        tx.set_current_loan(copy_id, loan.id).await.unwrap();
        tx.commit().await.unwrap();

        assert!(repository.loan(loan.id).is_some());
        assert_eq!(
            repository.copy(copy_id).unwrap().current_loan_id,
            Some(loan.id)
        );
    }

    /// Conditional writes
    /// 1. mark_returned succeeds once, then reports false
    /// 2. clear_current_loan_if_owner refuses a foreign loan id
    /// 3. clear_current_loan_if_owner clears when the pointer matches
    #[tokio::test]
    async fn test_conditional_updates() {
        let repository = InMemoryCirculationRepository::new();
        let copy_id = seeded_copy(&repository);
        let member_id = repository.add_member("Alice", "alice@example.com");

        let loaned_at = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let loan_id = repository.add_loan(member_id, copy_id, loaned_at, loaned_at + Duration::days(30));

        let mut tx = repository.begin().await.unwrap();
        assert!(tx.mark_returned(loan_id, loaned_at + Duration::days(3)).await.unwrap());
        assert!(!tx.mark_returned(loan_id, loaned_at + Duration::days(4)).await.unwrap());

        assert!(!tx.clear_current_loan_if_owner(copy_id, loan_id + 999).await.unwrap());
        assert!(tx.clear_current_loan_if_owner(copy_id, loan_id).await.unwrap());
        tx.commit().await.unwrap();

        let loan = repository.loan(loan_id).unwrap();
        assert_eq!(loan.returned_at, Some(loaned_at + Duration::days(3)));
        assert_eq!(repository.copy(copy_id).unwrap().current_loan_id, None);
    }

    /// Due-notice scan
    /// 1. Only active, unnotified loans inside the window are returned
    /// 2. Pages are ordered by id and respect the keyset cursor
    /// 3. mark_notices_sent skips returned and already-marked rows
    #[tokio::test]
    async fn test_due_notice_scan_and_mark() {
        let repository = InMemoryCirculationRepository::new();
        let library_id = repository.add_library("Central");
        let book_id = repository.add_book("Clean Code", BookCategory::Book);
        let member_id = repository.add_member("Alice", "alice@example.com");

        let window_start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        let in_window = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        let loaned_at = in_window - Duration::days(30);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let copy_id = repository.add_copy(book_id, library_id);
            ids.push(repository.add_loan(member_id, copy_id, loaned_at, in_window));
        }
        // Outside the window on both sides.
        let early_copy = repository.add_copy(book_id, library_id);
        repository.add_loan(member_id, early_copy, loaned_at, window_start - Duration::seconds(1));
        let late_copy = repository.add_copy(book_id, library_id);
        repository.add_loan(member_id, late_copy, loaned_at, window_end);

        let first = repository
            .due_soon_notices(window_start, window_end, 0, 2)
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|n| n.loan_id).collect::<Vec<_>>(),
            vec![ids[0], ids[1]]
        );
        assert_eq!(first[0].member_email, "alice@example.com");
        assert_eq!(first[0].book_title, "Clean Code");

        let second = repository
            .due_soon_notices(window_start, window_end, ids[1], 2)
            .await
            .unwrap();
        assert_eq!(
            second.iter().map(|n| n.loan_id).collect::<Vec<_>>(),
            vec![ids[2]]
        );

        // Return one scanned loan before marking: it must not be stamped.
        let mut tx = repository.begin().await.unwrap();
        assert!(tx.mark_returned(ids[0], in_window).await.unwrap());
        tx.commit().await.unwrap();

        let marked = repository
            .mark_notices_sent(in_window, &[ids[0], ids[1], ids[2]])
            .await
            .unwrap();
        assert_eq!(marked, 2);
        assert!(repository.loan(ids[0]).unwrap().due_notice_sent_at.is_none());
        assert!(repository.loan(ids[1]).unwrap().due_notice_sent_at.is_some());

        // Marked rows disappear from the scan.
        let rescan = repository
            .due_soon_notices(window_start, window_end, 0, 10)
            .await
            .unwrap();
        assert!(rescan.is_empty());

        // A second mark of the same ids touches nothing.
        let remarked = repository
            .mark_notices_sent(in_window, &[ids[1], ids[2]])
            .await
            .unwrap();
        assert_eq!(remarked, 0);
    }

    /// Listing order: open loans first by due date, then returned loans,
    /// most recently returned first.
    #[tokio::test]
    async fn test_loans_for_member_order() {
        let repository = InMemoryCirculationRepository::new();
        let library_id = repository.add_library("Central");
        let book_id = repository.add_book("Clean Code", BookCategory::Book);
        let member_id = repository.add_member("Alice", "alice@example.com");

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let c1 = repository.add_copy(book_id, library_id);
        let c2 = repository.add_copy(book_id, library_id);
        let c3 = repository.add_copy(book_id, library_id);

        let open_late = repository.add_loan(member_id, c1, t0, t0 + Duration::days(28));
        let open_soon = repository.add_loan(member_id, c2, t0, t0 + Duration::days(7));
        let returned = repository.add_loan(member_id, c3, t0, t0 + Duration::days(14));

        let mut tx = repository.begin().await.unwrap();
        assert!(tx.mark_returned(returned, t0 + Duration::days(2)).await.unwrap());
        tx.commit().await.unwrap();

        let loans = repository.loans_for_member(member_id).await.unwrap();
        assert_eq!(
            loans.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![open_soon, open_late, returned]
        );
    }
}

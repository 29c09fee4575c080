//! End-to-end circulation flow: grant, due notification batch, return

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use biblis_server::{
    clock::FixedClock,
    error::AppResult,
    models::{BookCategory, DueSoonNotice},
    repository::memory::InMemoryCirculationRepository,
    services::{
        limits::LoanLimits,
        loans::LoansService,
        notifications::NotificationsService,
        notifier::DueNotifier,
    },
};

/// Captures every notice instead of delivering it.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DueNotifier for RecordingNotifier {
    async fn send_due_notice(&self, notice: &DueSoonNotice) -> AppResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((notice.member_email.clone(), notice.book_title.clone()));
        Ok(())
    }
}

fn grant_day() -> DateTime<Utc> {
    // Thirty days before the January 15th due date.
    Utc.with_ymd_and_hms(2023, 12, 16, 10, 0, 0).unwrap()
}

fn batch_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
}

fn loans_at(
    repository: &Arc<InMemoryCirculationRepository>,
    moment: DateTime<Utc>,
) -> LoansService {
    LoansService::new(
        repository.clone(),
        LoanLimits::default(),
        Arc::new(FixedClock::at(moment)),
    )
}

/// Full lifecycle across both services
/// 1. Alice borrows two books due on January 15th; a third loan is due later
/// 2. The batch five days ahead notifies exactly the two January 15th loans
/// 3. A re-run delivers nothing
/// 4. Alice returns one book; the copy becomes grantable again
/// 5. Her loan listing shows open loans before the returned one
#[tokio::test]
async fn circulation_lifecycle() {
    let repository = Arc::new(InMemoryCirculationRepository::new());
    let library_id = repository.add_library("Central");
    let alice = repository.add_member("Alice", "alice@example.com");
    repository.add_member("Bob", "bob@example.com");

    let clean_code = repository.add_book("Clean Code", BookCategory::Book);
    let refactoring = repository.add_book("Refactoring", BookCategory::Book);
    let pragmatic = repository.add_book("The Pragmatic Programmer", BookCategory::Book);
    let copy_a = repository.add_copy(clean_code, library_id);
    let copy_b = repository.add_copy(refactoring, library_id);
    let copy_c = repository.add_copy(pragmatic, library_id);

    // 1. Two grants land a due date of 2024-01-15T10:00:00Z.
    let granting = loans_at(&repository, grant_day());
    let loan_a = granting.grant_loan(copy_a, "alice@example.com").await.unwrap();
    let loan_b = granting.grant_loan(copy_b, "alice@example.com").await.unwrap();
    assert_eq!(
        loan_a.due_at,
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    );

    // A loan due outside the window must not be picked up.
    repository.add_loan(
        alice,
        copy_c,
        batch_day(),
        Utc.with_ymd_and_hms(2024, 1, 20, 10, 0, 0).unwrap(),
    );

    // 2. The batch on January 10th, five days ahead, finds both loans.
    let notifier = Arc::new(RecordingNotifier::default());
    let notifications = NotificationsService::new(
        repository.clone(),
        notifier.clone(),
        Arc::new(FixedClock::at(batch_day())),
    );
    let notified = notifications.notify_due_soon(5, Utc, 200).await.unwrap();
    assert_eq!(notified, 2);
    assert_eq!(
        notifier.sent(),
        vec![
            ("alice@example.com".to_string(), "Clean Code".to_string()),
            ("alice@example.com".to_string(), "Refactoring".to_string()),
        ]
    );
    assert!(repository.loan(loan_a.id).unwrap().due_notice_sent_at.is_some());
    assert!(repository.loan(loan_b.id).unwrap().due_notice_sent_at.is_some());

    // 3. Nothing is delivered twice.
    let rerun = notifications.notify_due_soon(5, Utc, 200).await.unwrap();
    assert_eq!(rerun, 0);
    assert_eq!(notifier.sent().len(), 2);

    // 4. After the return the copy can go straight back out.
    let returning = loans_at(&repository, batch_day());
    let returned = returning.return_loan(loan_a.id, "alice@example.com").await.unwrap();
    assert_eq!(returned.returned_at, Some(batch_day()));
    returning.grant_loan(copy_a, "bob@example.com").await.unwrap();

    // 5. Open loans come first in the listing.
    let listing = returning.loans_for_member("alice@example.com").await.unwrap();
    assert_eq!(listing.len(), 3);
    assert!(listing[0].is_active());
    assert!(listing[1].is_active());
    assert_eq!(listing[2].id, loan_a.id);
    assert!(!listing[2].is_active());
}

/// A batch run with a page size smaller than the backlog still works
/// through every due loan exactly once.
#[tokio::test]
async fn small_pages_cover_the_whole_backlog() {
    let repository = Arc::new(InMemoryCirculationRepository::new());
    let library_id = repository.add_library("Central");
    let alice = repository.add_member("Alice", "alice@example.com");

    for i in 0..7 {
        let book_id = repository.add_book(&format!("Book {}", i), BookCategory::Book);
        let copy_id = repository.add_copy(book_id, library_id);
        repository.add_loan(
            alice,
            copy_id,
            batch_day() - Duration::days(25),
            Utc.with_ymd_and_hms(2024, 1, 15, 8 + i, 0, 0).unwrap(),
        );
    }

    let notifier = Arc::new(RecordingNotifier::default());
    let notifications = NotificationsService::new(
        repository.clone(),
        notifier.clone(),
        Arc::new(FixedClock::at(batch_day())),
    );

    let notified = notifications.notify_due_soon(5, Utc, 3).await.unwrap();
    assert_eq!(notified, 7);
    assert_eq!(notifier.sent().len(), 7);
}

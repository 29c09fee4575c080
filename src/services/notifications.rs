//! Due-soon notification batch processor

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::LoanId,
    repository::CirculationRepository,
    services::notifier::DueNotifier,
};

#[derive(Clone)]
pub struct NotificationsService {
    repository: Arc<dyn CirculationRepository>,
    notifier: Arc<dyn DueNotifier>,
    clock: Arc<dyn Clock>,
}

impl NotificationsService {
    pub fn new(
        repository: Arc<dyn CirculationRepository>,
        notifier: Arc<dyn DueNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            notifier,
            clock,
        }
    }

    /// Notify every active, unnotified loan due on the day exactly
    /// `days_ahead` days from today in `zone`, and stamp each one as
    /// notified. Returns the number of loans stamped.
    ///
    /// The scan walks id-ordered pages with a keyset cursor, so a run over a
    /// growing loan table terminates and never repeats a row. Each page is
    /// emitted first and then stamped with one conditional bulk update; a
    /// delivery failure aborts the run before its page is stamped, which
    /// makes delivery at-least-once across retried runs while the stamp
    /// itself stays at-most-once.
    pub async fn notify_due_soon<Tz>(
        &self,
        days_ahead: i64,
        zone: Tz,
        page_size: i64,
    ) -> AppResult<u64>
    where
        Tz: TimeZone + Send + Sync,
        Tz::Offset: Send,
    {
        if days_ahead < 0 {
            return Err(AppError::Internal(format!(
                "days_ahead must be non-negative, got {}",
                days_ahead
            )));
        }
        if page_size <= 0 {
            return Err(AppError::Internal(format!(
                "page_size must be positive, got {}",
                page_size
            )));
        }

        let (window_start, window_end) = due_window(self.clock.now(), days_ahead, &zone)?;
        tracing::debug!(%window_start, %window_end, "scanning for loans due soon");

        let mut after_id: LoanId = 0;
        let mut notified: u64 = 0;

        loop {
            let page = self
                .repository
                .due_soon_notices(window_start, window_end, after_id, page_size)
                .await?;

            let last_id = match page.last() {
                Some(notice) => notice.loan_id,
                None => break,
            };

            for notice in &page {
                self.notifier.send_due_notice(notice).await?;
            }

            let ids: Vec<LoanId> = page.iter().map(|n| n.loan_id).collect();
            let marked = self
                .repository
                .mark_notices_sent(self.clock.now(), &ids)
                .await?;
            if marked < ids.len() as u64 {
                tracing::debug!(
                    scanned = ids.len(),
                    marked,
                    "skipped rows returned or marked since the scan"
                );
            }
            notified += marked;

            if (page.len() as i64) < page_size {
                break;
            }
            after_id = last_id;
        }

        tracing::info!(notified, days_ahead, "due-notice run complete");
        Ok(notified)
    }
}

/// UTC bounds of the calendar day `days_ahead` days from today in `zone`:
/// `[start of day, start of next day)`. Computing the end as the next day's
/// start keeps the window correct on 23- and 25-hour DST days.
fn due_window<Tz: TimeZone>(
    now: DateTime<Utc>,
    days_ahead: i64,
    zone: &Tz,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let today = now.with_timezone(zone).date_naive();
    let target = today + Duration::days(days_ahead);

    let start = start_of_day(zone, target)?;
    let end = start_of_day(zone, target + Duration::days(1))?;

    Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

fn start_of_day<Tz: TimeZone>(zone: &Tz, date: NaiveDate) -> AppResult<DateTime<Tz>> {
    // When midnight falls into a DST gap, take the earliest valid instant
    // after it.
    for offset_hours in 0..=3 {
        let local = date.and_time(NaiveTime::MIN) + Duration::hours(offset_hours);
        if let Some(dt) = zone.from_local_datetime(&local).earliest() {
            return Ok(dt);
        }
    }

    Err(AppError::Internal(format!(
        "No valid start of day for {}",
        date
    )))
}

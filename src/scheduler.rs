//! Daily due-notice trigger
//!
//! The notification batch never schedules itself; this host-owned loop fires
//! it once a day at the configured local time.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};

use crate::{config::NoticesConfig, services::notifications::NotificationsService};

pub struct DueNoticeScheduler {
    notifications: NotificationsService,
    config: NoticesConfig,
}

impl DueNoticeScheduler {
    pub fn new(notifications: NotificationsService, config: NoticesConfig) -> Self {
        Self {
            notifications,
            config,
        }
    }

    /// Sleep until the next configured fire time, run one notification
    /// batch, repeat. Runs are strictly sequential; a failed run is logged
    /// and the loop carries on with the next day.
    pub async fn run(&self) {
        loop {
            let now = Local::now();
            let next = next_occurrence(&now, self.config.run_at);
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);

            tracing::info!(next_run = %next, "due-notice scheduler waiting");
            tokio::time::sleep(wait).await;

            match self
                .notifications
                .notify_due_soon(self.config.days_ahead, Local, self.config.page_size)
                .await
            {
                Ok(notified) => tracing::info!(notified, "scheduled due-notice run finished"),
                Err(e) => tracing::error!(error = %e, "scheduled due-notice run failed"),
            }
        }
    }
}

/// First instant strictly after `now` whose local wall-clock time is
/// `run_at`. Skips forward over DST gaps.
fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, run_at: NaiveTime) -> DateTime<Tz> {
    let zone = now.timezone();
    let mut date = now.date_naive();

    loop {
        let candidate = date.and_time(run_at);
        if let Some(at) = zone.from_local_datetime(&candidate).earliest() {
            if at > *now {
                return at;
            }
        }
        date = date + Duration::days(1);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn fires_later_today_while_the_time_is_still_ahead() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 7, 30, 0).unwrap();

        assert_eq!(
            next_occurrence(&now, nine()),
            Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn rolls_over_to_tomorrow_once_the_time_has_passed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 1).unwrap();

        assert_eq!(
            next_occurrence(&now, nine()),
            Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn an_exact_hit_schedules_the_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();

        assert_eq!(
            next_occurrence(&now, nine()),
            Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn crosses_month_boundaries() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap();

        assert_eq!(
            next_occurrence(&now, nine()),
            Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
        );
    }
}

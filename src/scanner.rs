use chrono::{Days, NaiveDate, Utc};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{config::Config, errors::AppError, installments, notifications};

/// Lookahead window: installments due within this many days get a reminder.
pub const DUE_WINDOW_DAYS: u64 = 3;

/// One scan pass: every active installment due in `[today, today + 3]`
/// produces a reminder notification for its owner. A single installment's
/// failure is logged and does not stop the rest of the pass. Returns the
/// number of reminders emitted.
pub async fn scan_due_installments(
    pool: &SqlitePool,
    today: NaiveDate,
    remind_once: bool,
) -> Result<usize, AppError> {
    let horizon = today
        .checked_add_days(Days::new(DUE_WINDOW_DAYS))
        .ok_or(AppError::Internal)?;
    let due = installments::due_within(pool, today, horizon).await?;

    let mut emitted = 0;
    for inst in due {
        if remind_once && inst.last_reminded_on == Some(inst.next_due_date) {
            continue;
        }
        let days_left = (inst.next_due_date - today).num_days();
        let message = format!(
            "{} day(s) until the \"{}\" installment is due ({} per month)",
            days_left, inst.title, inst.monthly_amount
        );
        match notifications::append(
            pool,
            Some(inst.user_id),
            "Installment reminder",
            &message,
            "installment",
            false,
        )
        .await
        {
            Ok(_) => {
                emitted += 1;
                if remind_once {
                    if let Err(e) = installments::mark_reminded(pool, inst.id).await {
                        log::warn!("Could not stamp reminder on installment {}: {}", inst.id, e);
                    }
                }
            }
            Err(e) => {
                log::warn!("Skipping reminder for installment {}: {}", inst.id, e);
            }
        }
    }
    Ok(emitted)
}

/// Periodic driver for the scanner. The first pass runs one full period
/// after startup. Shutdown is only observed between passes, so an in-flight
/// pass always runs to completion; each pass is bounded by the configured
/// timeout.
pub async fn run(pool: SqlitePool, config: Config, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + config.scan_interval,
        config.scan_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!(
        "Due-date scanner started (period {:?}, remind_once {})",
        config.scan_interval,
        config.remind_once
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let today = Utc::now().date_naive();
        match tokio::time::timeout(
            config.scan_timeout,
            scan_due_installments(&pool, today, config.remind_once),
        )
        .await
        {
            Ok(Ok(count)) => log::info!("Due-date scan complete, {} reminder(s) emitted", count),
            Ok(Err(e)) => log::error!("Due-date scan failed: {}", e),
            Err(_) => log::error!(
                "Due-date scan exceeded {:?} and was aborted",
                config.scan_timeout
            ),
        }

        if *shutdown.borrow() {
            break;
        }
    }
    log::info!("Due-date scanner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn installment_due_in_three_days_produces_one_reminder() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        testutil::installment(&pool, user.id, "car loan", date(2024, 6, 13), 13, 2, 12).await;

        let emitted = scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        assert_eq!(emitted, 1);

        let listed = notifications::list_for(&pool, user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, "installment");
        assert_eq!(listed[0].user_id, Some(user.id));
        assert!(listed[0].message.contains("car loan"));
        assert!(listed[0].message.contains("250"));
        assert!(listed[0].message.starts_with("3 day"));
    }

    #[tokio::test]
    async fn installment_due_today_counts_as_zero_days() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        testutil::installment(&pool, user.id, "rent", date(2024, 6, 10), 10, 0, 12).await;

        let emitted = scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        assert_eq!(emitted, 1);

        let listed = notifications::list_for(&pool, user.id).await.unwrap();
        assert!(listed[0].message.starts_with("0 day"));
    }

    #[tokio::test]
    async fn installments_outside_the_window_are_silent() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        testutil::installment(&pool, user.id, "four out", date(2024, 6, 14), 14, 0, 12).await;
        testutil::installment(&pool, user.id, "ten out", date(2024, 6, 20), 20, 0, 12).await;
        testutil::installment(&pool, user.id, "overdue", date(2024, 6, 9), 9, 0, 12).await;

        let emitted = scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        assert_eq!(emitted, 0);
        assert!(notifications::list_for(&pool, user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_installments_are_not_reminded() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "paid off", date(2024, 6, 12), 12, 0, 1).await;
        installments::register_payment(&pool, inst.id, user.id).await.unwrap();

        let emitted = scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        assert_eq!(emitted, 0);
    }

    #[tokio::test]
    async fn daily_rescans_repeat_by_default() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        testutil::installment(&pool, user.id, "rent", date(2024, 6, 12), 12, 0, 12).await;

        scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        scan_due_installments(&pool, date(2024, 6, 11), false).await.unwrap();

        let listed = notifications::list_for(&pool, user.id).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn remind_once_collapses_the_window_to_one_reminder() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        testutil::installment(&pool, user.id, "rent", date(2024, 6, 12), 12, 0, 12).await;

        assert_eq!(scan_due_installments(&pool, date(2024, 6, 10), true).await.unwrap(), 1);
        assert_eq!(scan_due_installments(&pool, date(2024, 6, 11), true).await.unwrap(), 0);
        assert_eq!(scan_due_installments(&pool, date(2024, 6, 12), true).await.unwrap(), 0);

        let listed = notifications::list_for(&pool, user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn remind_once_fires_again_for_the_next_due_date() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "rent", date(2024, 6, 12), 12, 0, 12).await;

        assert_eq!(scan_due_installments(&pool, date(2024, 6, 10), true).await.unwrap(), 1);

        // A payment moves the due date a month out; the next window reminds anew.
        installments::register_payment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(scan_due_installments(&pool, date(2024, 7, 10), true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn each_owner_gets_their_own_reminder() {
        let pool = testutil::pool().await;
        let ada = testutil::user(&pool, "ada").await;
        let bob = testutil::user(&pool, "bob").await;
        testutil::installment(&pool, ada.id, "loan a", date(2024, 6, 11), 11, 0, 12).await;
        testutil::installment(&pool, bob.id, "loan b", date(2024, 6, 12), 12, 0, 12).await;

        let emitted = scan_due_installments(&pool, date(2024, 6, 10), false).await.unwrap();
        assert_eq!(emitted, 2);

        let for_ada = notifications::list_for(&pool, ada.id).await.unwrap();
        assert_eq!(for_ada.len(), 1);
        assert!(for_ada[0].message.contains("loan a"));

        let for_bob = notifications::list_for(&pool, bob.id).await.unwrap();
        assert_eq!(for_bob.len(), 1);
        assert!(for_bob[0].message.contains("loan b"));
    }
}

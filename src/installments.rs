use chrono::{Datelike, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    errors::AppError,
    structs::{Installment, InstallmentStatus},
};

/// Upper bound on optimistic-update retries for a single payment call.
const MAX_PAYMENT_RETRIES: u32 = 5;

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_of_next.pred_opt()?.day())
}

/// Moves a due date into the following calendar month, landing on `due_day`
/// or, when the target month is shorter, on its last day. 2024-01-31 with
/// due day 31 becomes 2024-02-29, which in turn becomes 2024-03-31.
pub fn advance_due_date(current: NaiveDate, due_day: u32) -> Option<NaiveDate> {
    let (year, month) = if current.month() == 12 {
        (current.year() + 1, 1)
    } else {
        (current.year(), current.month() + 1)
    };
    let day = due_day.clamp(1, days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// First occurrence of `due_day` on or after `start`, with the same clamping
/// rule as [`advance_due_date`].
pub fn first_due_date(start: NaiveDate, due_day: u32) -> Option<NaiveDate> {
    let day = due_day.clamp(1, days_in_month(start.year(), start.month())?);
    let candidate = NaiveDate::from_ymd_opt(start.year(), start.month(), day)?;
    if candidate >= start {
        Some(candidate)
    } else {
        advance_due_date(candidate, due_day)
    }
}

#[derive(Debug, Deserialize)]
pub struct NewInstallment {
    pub title: String,
    pub total_amount: f64,
    pub monthly_amount: f64,
    pub total_count: i64,
    pub due_day: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub next_due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewInstallment {
    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title is required".into()));
        }
        if self.total_amount <= 0.0 || self.monthly_amount <= 0.0 {
            return Err(AppError::Validation("amounts must be positive".into()));
        }
        if self.total_count < 1 {
            return Err(AppError::Validation("total_count must be at least 1".into()));
        }
        if !(1..=31).contains(&self.due_day) {
            return Err(AppError::Validation("due_day must be between 1 and 31".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InstallmentPatch {
    pub title: Option<String>,
    pub total_amount: Option<f64>,
    pub monthly_amount: Option<f64>,
    pub total_count: Option<i64>,
    pub due_day: Option<i64>,
    pub next_due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub async fn get_installments_by_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<Installment>, AppError> {
    let installments = sqlx::query_as::<_, Installment>(
        "SELECT * FROM installments WHERE user_id = ? ORDER BY next_due_date, id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(installments)
}

pub async fn get_installment(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> Result<Installment, AppError> {
    let installment =
        sqlx::query_as::<_, Installment>("SELECT * FROM installments WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    installment.ok_or(AppError::NotFound)
}

pub async fn create_installment(
    pool: &SqlitePool,
    user_id: i64,
    new: &NewInstallment,
) -> Result<Installment, AppError> {
    new.validate()?;
    let next_due_date = match new.next_due_date {
        Some(date) => date,
        None => first_due_date(new.start_date, new.due_day as u32).ok_or(AppError::Internal)?,
    };
    let installment = sqlx::query_as::<_, Installment>(
        "INSERT INTO installments \
             (user_id, title, total_amount, monthly_amount, paid_count, total_count, due_day, \
              start_date, end_date, next_due_date, status, notes, created_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, 'active', ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(&new.title)
    .bind(new.total_amount)
    .bind(new.monthly_amount)
    .bind(new.total_count)
    .bind(new.due_day)
    .bind(new.start_date)
    .bind(new.end_date)
    .bind(next_due_date)
    .bind(&new.notes)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    log::info!(
        "Installment created: \"{}\" (id {}, user {})",
        installment.title,
        installment.id,
        user_id
    );
    Ok(installment)
}

pub async fn update_installment(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    patch: &InstallmentPatch,
) -> Result<Installment, AppError> {
    let current = get_installment(pool, id, user_id).await?;

    if let Some(total_count) = patch.total_count {
        if total_count < current.paid_count {
            return Err(AppError::Validation(
                "total_count cannot drop below paid_count".into(),
            ));
        }
    }
    if let Some(due_day) = patch.due_day {
        if !(1..=31).contains(&due_day) {
            return Err(AppError::Validation("due_day must be between 1 and 31".into()));
        }
    }
    if matches!(patch.total_amount, Some(v) if v <= 0.0)
        || matches!(patch.monthly_amount, Some(v) if v <= 0.0)
    {
        return Err(AppError::Validation("amounts must be positive".into()));
    }

    // Shrinking total_count onto the paid count completes the plan; the
    // completed status itself never reverts.
    let effective_total = patch.total_count.unwrap_or(current.total_count);
    let status = if current.paid_count >= effective_total {
        InstallmentStatus::Completed
    } else {
        current.status
    };

    let installment = sqlx::query_as::<_, Installment>(
        "UPDATE installments SET \
             title = COALESCE(?, title), \
             total_amount = COALESCE(?, total_amount), \
             monthly_amount = COALESCE(?, monthly_amount), \
             total_count = COALESCE(?, total_count), \
             due_day = COALESCE(?, due_day), \
             next_due_date = COALESCE(?, next_due_date), \
             notes = COALESCE(?, notes), \
             status = ? \
         WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(&patch.title)
    .bind(patch.total_amount)
    .bind(patch.monthly_amount)
    .bind(patch.total_count)
    .bind(patch.due_day)
    .bind(patch.next_due_date)
    .bind(&patch.notes)
    .bind(status)
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(installment)
}

pub async fn delete_installment(pool: &SqlitePool, id: i64, user_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM installments WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Registers one payment: bumps `paid_count`, completes the plan when the
/// last due is paid, otherwise advances `next_due_date` by one calendar
/// month. The write is conditional on the `paid_count` that was read, so
/// concurrent calls each count exactly once; a lost race re-reads and
/// retries up to [`MAX_PAYMENT_RETRIES`] times.
pub async fn register_payment(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> Result<Installment, AppError> {
    for _ in 0..MAX_PAYMENT_RETRIES {
        let current = get_installment(pool, id, user_id).await?;
        if current.status == InstallmentStatus::Completed {
            return Err(AppError::AlreadyCompleted);
        }

        let paid_count = current.paid_count + 1;
        let (status, next_due_date) = if paid_count >= current.total_count {
            (InstallmentStatus::Completed, current.next_due_date)
        } else {
            let advanced = advance_due_date(current.next_due_date, current.due_day as u32)
                .ok_or(AppError::Internal)?;
            (InstallmentStatus::Active, advanced)
        };

        let result = sqlx::query(
            "UPDATE installments SET paid_count = ?, status = ?, next_due_date = ? \
             WHERE id = ? AND user_id = ? AND status = 'active' AND paid_count = ?",
        )
        .bind(paid_count)
        .bind(status)
        .bind(next_due_date)
        .bind(id)
        .bind(user_id)
        .bind(current.paid_count)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            log::info!(
                "Payment {}/{} registered for installment {} (user {})",
                paid_count,
                current.total_count,
                id,
                user_id
            );
            return Ok(Installment {
                paid_count,
                status,
                next_due_date,
                ..current
            });
        }
        log::warn!("Payment on installment {} lost a concurrent update, retrying", id);
    }
    Err(AppError::Conflict)
}

/// Active installments across all users with a due date inside the window.
pub async fn due_within(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<Installment>, AppError> {
    let installments = sqlx::query_as::<_, Installment>(
        "SELECT * FROM installments \
         WHERE status = 'active' AND next_due_date BETWEEN ? AND ? \
         ORDER BY user_id, next_due_date, id",
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    Ok(installments)
}

/// Stamps the current due date as reminded, for reminder de-duplication.
pub async fn mark_reminded(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE installments SET last_reminded_on = next_due_date WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn advance_keeps_due_day_in_long_months() {
        assert_eq!(advance_due_date(date(2024, 3, 15), 15), Some(date(2024, 4, 15)));
        assert_eq!(advance_due_date(date(2024, 4, 30), 30), Some(date(2024, 5, 30)));
    }

    #[test]
    fn advance_clamps_to_leap_february() {
        assert_eq!(advance_due_date(date(2024, 1, 31), 31), Some(date(2024, 2, 29)));
    }

    #[test]
    fn advance_clamps_to_plain_february() {
        assert_eq!(advance_due_date(date(2023, 1, 31), 31), Some(date(2023, 2, 28)));
    }

    #[test]
    fn advance_recovers_due_day_after_a_clamped_month() {
        // A Feb 29 due date with due day 31 lands back on Mar 31.
        assert_eq!(advance_due_date(date(2024, 2, 29), 31), Some(date(2024, 3, 31)));
    }

    #[test]
    fn advance_rolls_over_december() {
        assert_eq!(advance_due_date(date(2024, 12, 10), 10), Some(date(2025, 1, 10)));
    }

    #[test]
    fn first_due_date_prefers_the_start_month() {
        assert_eq!(first_due_date(date(2024, 1, 10), 15), Some(date(2024, 1, 15)));
        assert_eq!(first_due_date(date(2024, 1, 31), 31), Some(date(2024, 1, 31)));
    }

    #[test]
    fn first_due_date_moves_past_an_elapsed_due_day() {
        assert_eq!(first_due_date(date(2024, 1, 20), 15), Some(date(2024, 2, 15)));
    }

    #[tokio::test]
    async fn payment_increments_and_advances_one_month() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "car loan", date(2024, 3, 15), 15, 0, 12).await;

        let paid = register_payment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(paid.paid_count, 1);
        assert_eq!(paid.status, InstallmentStatus::Active);
        assert_eq!(paid.next_due_date, date(2024, 4, 15));

        let stored = get_installment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(stored.paid_count, 1);
        assert_eq!(stored.next_due_date, date(2024, 4, 15));
    }

    #[tokio::test]
    async fn payment_clamps_january_31_to_leap_february() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "rent", date(2024, 1, 31), 31, 0, 12).await;

        let paid = register_payment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(paid.next_due_date, date(2024, 2, 29));
    }

    #[tokio::test]
    async fn final_payment_completes_without_advancing() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "phone", date(2024, 5, 1), 1, 11, 12).await;

        let paid = register_payment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(paid.paid_count, 12);
        assert_eq!(paid.status, InstallmentStatus::Completed);
        assert_eq!(paid.next_due_date, date(2024, 5, 1));
    }

    #[tokio::test]
    async fn two_payments_drain_a_two_due_plan() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "sofa", date(2024, 6, 10), 10, 0, 2).await;

        register_payment(&pool, inst.id, user.id).await.unwrap();
        let second = register_payment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(second.paid_count, 2);
        assert_eq!(second.status, InstallmentStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_payments_each_count_exactly_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = testutil::file_pool(dir.path()).await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "car loan", date(2024, 6, 10), 10, 0, 12).await;

        // Two payments race on separate pool connections; whichever writer
        // loses the conditional update re-reads and retries, so both must
        // land and the count must be exact.
        let (first, second) = tokio::join!(
            register_payment(&pool, inst.id, user.id),
            register_payment(&pool, inst.id, user.id)
        );
        first.unwrap();
        second.unwrap();

        let stored = get_installment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(stored.paid_count, 2);
        assert_eq!(stored.status, InstallmentStatus::Active);
        assert_eq!(stored.next_due_date, date(2024, 8, 10));
    }

    #[tokio::test]
    async fn paying_a_completed_installment_is_rejected() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "sofa", date(2024, 6, 10), 10, 0, 1).await;

        register_payment(&pool, inst.id, user.id).await.unwrap();
        let err = register_payment(&pool, inst.id, user.id).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyCompleted));

        let stored = get_installment(&pool, inst.id, user.id).await.unwrap();
        assert_eq!(stored.paid_count, 1);
    }

    #[tokio::test]
    async fn paying_a_missing_or_foreign_installment_is_not_found() {
        let pool = testutil::pool().await;
        let owner = testutil::user(&pool, "owner").await;
        let other = testutil::user(&pool, "other").await;
        let inst =
            testutil::installment(&pool, owner.id, "tv", date(2024, 2, 5), 5, 0, 6).await;

        let missing = register_payment(&pool, 9999, owner.id).await.unwrap_err();
        assert!(matches!(missing, AppError::NotFound));

        let foreign = register_payment(&pool, inst.id, other.id).await.unwrap_err();
        assert!(matches!(foreign, AppError::NotFound));

        let stored = get_installment(&pool, inst.id, owner.id).await.unwrap();
        assert_eq!(stored.paid_count, 0);
    }

    #[tokio::test]
    async fn shrinking_total_count_to_paid_count_completes() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let inst =
            testutil::installment(&pool, user.id, "bike", date(2024, 8, 20), 20, 3, 12).await;

        let patch = InstallmentPatch {
            total_count: Some(3),
            ..InstallmentPatch::default()
        };
        let updated = update_installment(&pool, inst.id, user.id, &patch).await.unwrap();
        assert_eq!(updated.status, InstallmentStatus::Completed);

        let below = InstallmentPatch {
            total_count: Some(2),
            ..InstallmentPatch::default()
        };
        let err = update_installment(&pool, inst.id, user.id, &below).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn creation_defaults_next_due_date_from_start_date() {
        let pool = testutil::pool().await;
        let user = testutil::user(&pool, "pat").await;
        let new = NewInstallment {
            title: "laptop".into(),
            total_amount: 1200.0,
            monthly_amount: 100.0,
            total_count: 12,
            due_day: 15,
            start_date: date(2024, 3, 20),
            end_date: date(2025, 3, 20),
            next_due_date: None,
            notes: None,
        };
        let inst = create_installment(&pool, user.id, &new).await.unwrap();
        assert_eq!(inst.next_due_date, date(2024, 4, 15));
        assert_eq!(inst.paid_count, 0);
        assert_eq!(inst.status, InstallmentStatus::Active);
    }
}

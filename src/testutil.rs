use std::path::Path;

use chrono::{Months, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::{db, structs::Installment, structs::User};

/// In-memory database with the full schema applied. Single connection so
/// every query in a test sees the same database.
pub async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    pool
}

/// File-backed database with several connections, for tests that need real
/// concurrency between statements.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(dir.join("test.db"))
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .expect("file-backed sqlite");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    pool
}

pub async fn user(pool: &SqlitePool, name: &str) -> User {
    db::create_user(
        pool,
        name,
        &format!("{}@example.com", name),
        name,
        "not-a-real-hash",
        false,
    )
    .await
    .expect("test user")
}

/// Installment fixture with fixed amounts (3000 total, 250 monthly) and the
/// date fields derived from `next_due_date`.
pub async fn installment(
    pool: &SqlitePool,
    user_id: i64,
    title: &str,
    next_due_date: NaiveDate,
    due_day: i64,
    paid_count: i64,
    total_count: i64,
) -> Installment {
    let start_date = next_due_date
        .checked_sub_months(Months::new(paid_count as u32))
        .expect("fixture start date");
    let end_date = start_date
        .checked_add_months(Months::new(total_count as u32))
        .expect("fixture end date");
    let status = if paid_count >= total_count {
        "completed"
    } else {
        "active"
    };
    sqlx::query_as::<_, Installment>(
        "INSERT INTO installments \
             (user_id, title, total_amount, monthly_amount, paid_count, total_count, due_day, \
              start_date, end_date, next_due_date, status, notes, created_at) \
         VALUES (?, ?, 3000.0, 250.0, ?, ?, ?, ?, ?, ?, ?, NULL, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(title)
    .bind(paid_count)
    .bind(total_count)
    .bind(due_day)
    .bind(start_date)
    .bind(end_date)
    .bind(next_due_date)
    .bind(status)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .expect("test installment")
}

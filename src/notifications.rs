use chrono::Utc;
use sqlx::SqlitePool;

use crate::{errors::AppError, structs::Notification};

/// Response-size cap for a user's notification feed.
pub const LIST_LIMIT: i64 = 50;

pub async fn append(
    pool: &SqlitePool,
    user_id: Option<i64>,
    title: &str,
    message: &str,
    kind: &str,
    is_global: bool,
) -> Result<Notification, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (user_id, title, message, kind, is_global, is_read, created_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(is_global)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(notification)
}

pub async fn broadcast(pool: &SqlitePool, title: &str, message: &str) -> Result<Notification, AppError> {
    let notification = append(pool, None, title, message, "admin", true).await?;
    log::info!("Broadcast notification {} created: {}", notification.id, title);
    Ok(notification)
}

/// The user's own notifications plus global broadcasts, newest first, capped
/// at [`LIST_LIMIT`]. For global rows `is_read` reflects the acting user's
/// per-recipient read marker, not anyone else's.
pub async fn list_for(pool: &SqlitePool, user_id: i64) -> Result<Vec<Notification>, AppError> {
    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT n.id, n.user_id, n.title, n.message, n.kind, n.is_global, \
                CASE WHEN n.is_global = 1 THEN EXISTS( \
                    SELECT 1 FROM notification_reads r \
                    WHERE r.notification_id = n.id AND r.user_id = ?1) \
                ELSE n.is_read END AS is_read, \
                n.created_at \
         FROM notifications n \
         WHERE n.user_id = ?1 OR n.is_global = 1 \
         ORDER BY n.created_at DESC, n.id DESC \
         LIMIT ?2",
    )
    .bind(user_id)
    .bind(LIST_LIMIT)
    .fetch_all(pool)
    .await?;
    Ok(notifications)
}

/// Marks a notification read for the acting user. Owned notifications flip
/// their own flag; global ones record a per-recipient read marker so one
/// user's action never changes another user's view.
pub async fn mark_read(pool: &SqlitePool, id: i64, user_id: i64) -> Result<(), AppError> {
    let row: Option<(Option<i64>, bool)> =
        sqlx::query_as("SELECT user_id, is_global FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    let (owner, is_global) = row.ok_or(AppError::NotFound)?;

    if is_global {
        sqlx::query("INSERT OR IGNORE INTO notification_reads (notification_id, user_id) VALUES (?, ?)")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        return Ok(());
    }

    if owner != Some(user_id) {
        return Err(AppError::NotFound);
    }
    sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub fullname: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Asset {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub name: String,
    pub kind: String,
    pub amount: f64,
    pub buy_price: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub amount: f64,
    pub category: String,
    pub date: NaiveDate,
    pub direction: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Active,
    Completed,
}

/// A recurring payment obligation: `total_count` equal monthly dues of
/// `monthly_amount`, falling on `due_day` of each month.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Installment {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub total_amount: f64,
    pub monthly_amount: f64,
    pub paid_count: i64,
    pub total_count: i64,
    pub due_day: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub next_due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub notes: Option<String>,
    /// Due date a reminder was last emitted for, used when reminder
    /// de-duplication is enabled.
    pub last_reminded_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Notification {
    pub id: i64,
    /// None for global (broadcast) notifications.
    pub user_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub is_global: bool,
    /// For global notifications this is the acting user's own read state,
    /// resolved through `notification_reads`.
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct MarketAsset {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub kind: String,
    pub api_key: Option<String>,
    pub api_source: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PortfolioTarget {
    pub user_id: i64,
    pub crypto: f64,
    pub currency: f64,
    pub gold: f64,
    pub stock: f64,
}

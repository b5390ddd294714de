use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::{
    errors::AppError,
    structs::{Asset, MarketAsset, PortfolioTarget, Project, Transaction, User},
};

// ==================== users ====================

pub async fn get_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn get_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(user)
}

pub async fn get_all_users(pool: &SqlitePool) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    email: &str,
    fullname: &str,
    password_hash: &str,
    is_admin: bool,
) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, fullname, password_hash, is_admin, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(username)
    .bind(email)
    .bind(fullname)
    .bind(password_hash)
    .bind(is_admin)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    log::info!("User created: {} (id {})", user.username, user.id);
    Ok(user)
}

pub async fn update_user(
    pool: &SqlitePool,
    id: i64,
    email: Option<&str>,
    fullname: Option<&str>,
    is_admin: Option<bool>,
    password_hash: Option<&str>,
) -> Result<User, AppError> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET \
             email = COALESCE(?, email), \
             fullname = COALESCE(?, fullname), \
             is_admin = COALESCE(?, is_admin), \
             password_hash = COALESCE(?, password_hash) \
         WHERE id = ? RETURNING *",
    )
    .bind(email)
    .bind(fullname)
    .bind(is_admin)
    .bind(password_hash)
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn delete_user(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    log::info!("User with id {} deleted", id);
    Ok(())
}

pub async fn admin_exists(pool: &SqlitePool) -> Result<bool, AppError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_admin = 1")
        .fetch_one(pool)
        .await?;
    Ok(count.0 > 0)
}

/// Rotates the admin login. The original data model keeps a single admin
/// account, so this targets the admin flag rather than an id.
pub async fn update_admin_credentials(
    pool: &SqlitePool,
    username: &str,
    password_hash: &str,
) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE users SET username = ?, password_hash = ? WHERE is_admin = 1")
        .bind(username)
        .bind(password_hash)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

// ==================== assets ====================

pub async fn get_assets_by_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Asset>, AppError> {
    let assets = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE user_id = ? ORDER BY id")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(assets)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_asset(
    pool: &SqlitePool,
    user_id: i64,
    symbol: &str,
    name: &str,
    kind: &str,
    amount: f64,
    buy_price: f64,
    notes: Option<&str>,
) -> Result<Asset, AppError> {
    let asset = sqlx::query_as::<_, Asset>(
        "INSERT INTO assets (user_id, symbol, name, kind, amount, buy_price, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(name)
    .bind(kind)
    .bind(amount)
    .bind(buy_price)
    .bind(notes)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(asset)
}

pub async fn update_asset(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    amount: Option<f64>,
    buy_price: Option<f64>,
    notes: Option<&str>,
) -> Result<Asset, AppError> {
    let asset = sqlx::query_as::<_, Asset>(
        "UPDATE assets SET \
             amount = COALESCE(?, amount), \
             buy_price = COALESCE(?, buy_price), \
             notes = COALESCE(?, notes) \
         WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(amount)
    .bind(buy_price)
    .bind(notes)
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(asset)
}

pub async fn delete_asset(pool: &SqlitePool, id: i64, user_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM assets WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

// ==================== transactions ====================

pub async fn get_transactions_by_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<Transaction>, AppError> {
    let transactions = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE user_id = ? ORDER BY date DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(transactions)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_transaction(
    pool: &SqlitePool,
    user_id: i64,
    kind: &str,
    title: &str,
    amount: f64,
    category: &str,
    date: chrono::NaiveDate,
    direction: Option<&str>,
    notes: Option<&str>,
) -> Result<Transaction, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(
        "INSERT INTO transactions (user_id, kind, title, amount, category, date, direction, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(kind)
    .bind(title)
    .bind(amount)
    .bind(category)
    .bind(date)
    .bind(direction)
    .bind(notes)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(transaction)
}

pub async fn update_transaction(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    title: Option<&str>,
    amount: Option<f64>,
    category: Option<&str>,
    notes: Option<&str>,
) -> Result<Transaction, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(
        "UPDATE transactions SET \
             title = COALESCE(?, title), \
             amount = COALESCE(?, amount), \
             category = COALESCE(?, category), \
             notes = COALESCE(?, notes) \
         WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(title)
    .bind(amount)
    .bind(category)
    .bind(notes)
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(transaction)
}

pub async fn delete_transaction(pool: &SqlitePool, id: i64, user_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

// ==================== projects ====================

pub async fn get_projects_by_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Project>, AppError> {
    let projects = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE user_id = ? ORDER BY id")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(projects)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_project(
    pool: &SqlitePool,
    user_id: i64,
    title: &str,
    total_amount: f64,
    paid_amount: f64,
    start_date: Option<chrono::NaiveDate>,
    end_date: Option<chrono::NaiveDate>,
    status: &str,
    notes: Option<&str>,
) -> Result<Project, AppError> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (user_id, title, total_amount, paid_amount, start_date, end_date, status, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(title)
    .bind(total_amount)
    .bind(paid_amount)
    .bind(start_date)
    .bind(end_date)
    .bind(status)
    .bind(notes)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(project)
}

#[allow(clippy::too_many_arguments)]
pub async fn update_project(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    title: Option<&str>,
    total_amount: Option<f64>,
    paid_amount: Option<f64>,
    status: Option<&str>,
    notes: Option<&str>,
) -> Result<Project, AppError> {
    let project = sqlx::query_as::<_, Project>(
        "UPDATE projects SET \
             title = COALESCE(?, title), \
             total_amount = COALESCE(?, total_amount), \
             paid_amount = COALESCE(?, paid_amount), \
             status = COALESCE(?, status), \
             notes = COALESCE(?, notes) \
         WHERE id = ? AND user_id = ? RETURNING *",
    )
    .bind(title)
    .bind(total_amount)
    .bind(paid_amount)
    .bind(status)
    .bind(notes)
    .bind(id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(project)
}

pub async fn delete_project(pool: &SqlitePool, id: i64, user_id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

// ==================== market assets ====================

pub async fn get_market_assets(pool: &SqlitePool) -> Result<Vec<MarketAsset>, AppError> {
    let assets = sqlx::query_as::<_, MarketAsset>("SELECT * FROM market_assets ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(assets)
}

pub async fn create_market_asset(
    pool: &SqlitePool,
    symbol: &str,
    name: &str,
    kind: &str,
    api_key: Option<&str>,
    api_source: Option<&str>,
    enabled: bool,
) -> Result<MarketAsset, AppError> {
    let asset = sqlx::query_as::<_, MarketAsset>(
        "INSERT INTO market_assets (symbol, name, kind, api_key, api_source, enabled, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(symbol)
    .bind(name)
    .bind(kind)
    .bind(api_key)
    .bind(api_source)
    .bind(enabled)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(asset)
}

#[allow(clippy::too_many_arguments)]
pub async fn update_market_asset(
    pool: &SqlitePool,
    id: i64,
    symbol: Option<&str>,
    name: Option<&str>,
    kind: Option<&str>,
    api_key: Option<&str>,
    api_source: Option<&str>,
    enabled: Option<bool>,
) -> Result<MarketAsset, AppError> {
    let asset = sqlx::query_as::<_, MarketAsset>(
        "UPDATE market_assets SET \
             symbol = COALESCE(?, symbol), \
             name = COALESCE(?, name), \
             kind = COALESCE(?, kind), \
             api_key = COALESCE(?, api_key), \
             api_source = COALESCE(?, api_source), \
             enabled = COALESCE(?, enabled) \
         WHERE id = ? RETURNING *",
    )
    .bind(symbol)
    .bind(name)
    .bind(kind)
    .bind(api_key)
    .bind(api_source)
    .bind(enabled)
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(asset)
}

pub async fn delete_market_asset(pool: &SqlitePool, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM market_assets WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

// ==================== settings ====================

pub async fn get_settings(pool: &SqlitePool) -> Result<serde_json::Map<String, Value>, AppError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
        .fetch_all(pool)
        .await?;
    let mut settings = serde_json::Map::new();
    for (key, raw) in rows {
        match serde_json::from_str(&raw) {
            Ok(value) => {
                settings.insert(key, value);
            }
            Err(e) => log::warn!("Dropping unreadable setting {}: {}", key, e),
        }
    }
    Ok(settings)
}

/// Applies the whole batch or none of it: a failure partway through rolls
/// back so the stored settings keep their pre-image.
pub async fn update_settings(
    pool: &SqlitePool,
    settings: &serde_json::Map<String, Value>,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    for (key, value) in settings {
        let raw = value.to_string();
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(raw)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

// ==================== portfolio targets ====================

pub async fn get_portfolio_target(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Option<PortfolioTarget>, AppError> {
    let target =
        sqlx::query_as::<_, PortfolioTarget>("SELECT * FROM portfolio_targets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(target)
}

#[allow(clippy::too_many_arguments)]
pub async fn set_portfolio_target(
    pool: &SqlitePool,
    user_id: i64,
    crypto: f64,
    currency: f64,
    gold: f64,
    stock: f64,
) -> Result<PortfolioTarget, AppError> {
    let target = sqlx::query_as::<_, PortfolioTarget>(
        "INSERT OR REPLACE INTO portfolio_targets (user_id, crypto, currency, gold, stock) \
         VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(user_id)
    .bind(crypto)
    .bind(currency)
    .bind(gold)
    .bind(stock)
    .fetch_one(pool)
    .await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn asset_writes_require_ownership() {
        let pool = testutil::pool().await;
        let ada = testutil::user(&pool, "ada").await;
        let bob = testutil::user(&pool, "bob").await;

        let asset = create_asset(&pool, ada.id, "BTC", "Bitcoin", "crypto", 0.5, 40000.0, None)
            .await
            .unwrap();

        let update = update_asset(&pool, asset.id, bob.id, Some(1.0), None, None)
            .await
            .unwrap_err();
        assert!(matches!(update, AppError::NotFound));

        let delete = delete_asset(&pool, asset.id, bob.id).await.unwrap_err();
        assert!(matches!(delete, AppError::NotFound));

        let assets = get_assets_by_user(&pool, ada.id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].amount, 0.5);
    }

    #[tokio::test]
    async fn transaction_and_project_deletes_require_ownership() {
        let pool = testutil::pool().await;
        let ada = testutil::user(&pool, "ada").await;
        let bob = testutil::user(&pool, "bob").await;

        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let transaction = create_transaction(
            &pool, ada.id, "expense", "groceries", 80.0, "food", date, None, None,
        )
        .await
        .unwrap();
        let project = create_project(
            &pool, ada.id, "kitchen", 5000.0, 0.0, None, None, "active", None,
        )
        .await
        .unwrap();

        let t = delete_transaction(&pool, transaction.id, bob.id).await.unwrap_err();
        assert!(matches!(t, AppError::NotFound));
        let p = delete_project(&pool, project.id, bob.id).await.unwrap_err();
        assert!(matches!(p, AppError::NotFound));

        assert_eq!(get_transactions_by_user(&pool, ada.id).await.unwrap().len(), 1);
        assert_eq!(get_projects_by_user(&pool, ada.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_batch_rolls_back_when_one_write_fails() {
        let pool = testutil::pool().await;

        let mut seed = serde_json::Map::new();
        seed.insert("alpha".into(), serde_json::json!(1));
        update_settings(&pool, &seed).await.unwrap();

        // Reject one specific key so the second statement of the batch fails.
        sqlx::query(
            "CREATE TRIGGER reject_key BEFORE INSERT ON settings \
             WHEN NEW.key = 'reject' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut batch = serde_json::Map::new();
        batch.insert("alpha".into(), serde_json::json!(2));
        batch.insert("reject".into(), serde_json::json!(true));
        update_settings(&pool, &batch).await.unwrap_err();

        let stored = get_settings(&pool).await.unwrap();
        assert_eq!(stored.get("alpha"), Some(&serde_json::json!(1)));
        assert!(!stored.contains_key("reject"));
    }
}

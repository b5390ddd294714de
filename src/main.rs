use std::str::FromStr;

use actix_web::{
    middleware,
    web::{self, Data},
    App, HttpResponse, HttpServer,
};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};
use tokio::sync::watch;

mod admin;
mod config;
mod db;
mod errors;
mod installments;
mod notifications;
mod routes;
mod scanner;
mod sessions;
mod structs;
mod utils;

#[cfg(test)]
mod testutil;

use config::Config;
use errors::AppError;
use sessions::SessionStore;

#[derive(Debug, Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
}

/// Makes sure an admin account exists so a fresh install is manageable.
async fn bootstrap_admin(pool: &SqlitePool, config: &Config) -> Result<(), AppError> {
    if db::admin_exists(pool).await? {
        return Ok(());
    }
    let password_hash = utils::hash_password(&config.admin_password)?;
    db::create_user(
        pool,
        &config.admin_username,
        "admin@finledger.local",
        "Administrator",
        &password_hash,
        true,
    )
    .await?;
    info!("Default admin account '{}' created", config.admin_username);
    Ok(())
}

async fn default_handler() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": "route not found" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();

    let opts = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    sqlx::migrate!().run(&db_pool).await.map_err(AppError::from)?;
    info!("Database migrated successfully");

    bootstrap_admin(&db_pool, &config).await?;

    let session_store = Data::new(SessionStore::new(config.session_ttl));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner_task = tokio::spawn(scanner::run(
        db_pool.clone(),
        config.clone(),
        shutdown_rx,
    ));

    info!(
        "Starting HTTP server on http://{}:{}/",
        config.bind_addr, config.bind_port
    );

    let state = AppState {
        db_pool: db_pool.clone(),
    };
    let bind = (config.bind_addr.clone(), config.bind_port);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Compress::default())
            .wrap(middleware::Logger::default())
            .app_data(Data::new(state.clone()))
            .app_data(session_store.clone())
            // auth
            .service(routes::register_handler)
            .service(routes::login_handler)
            .service(routes::logout_handler)
            .service(routes::me_handler)
            // assets
            .service(routes::list_assets_handler)
            .service(routes::create_asset_handler)
            .service(routes::update_asset_handler)
            .service(routes::delete_asset_handler)
            // transactions
            .service(routes::list_transactions_handler)
            .service(routes::create_transaction_handler)
            .service(routes::update_transaction_handler)
            .service(routes::delete_transaction_handler)
            // projects
            .service(routes::list_projects_handler)
            .service(routes::create_project_handler)
            .service(routes::update_project_handler)
            .service(routes::delete_project_handler)
            // installments
            .service(routes::list_installments_handler)
            .service(routes::create_installment_handler)
            .service(routes::update_installment_handler)
            .service(routes::delete_installment_handler)
            .service(routes::pay_installment_handler)
            // notifications
            .service(routes::list_notifications_handler)
            .service(routes::mark_notification_read_handler)
            // portfolio target
            .service(routes::get_portfolio_target_handler)
            .service(routes::set_portfolio_target_handler)
            // admin
            .service(admin::list_users_handler)
            .service(admin::update_user_handler)
            .service(admin::delete_user_handler)
            .service(admin::list_market_assets_handler)
            .service(admin::create_market_asset_handler)
            .service(admin::update_market_asset_handler)
            .service(admin::delete_market_asset_handler)
            .service(admin::broadcast_handler)
            .service(admin::get_settings_handler)
            .service(admin::update_settings_handler)
            .service(admin::update_credentials_handler)
            .default_service(web::to(default_handler))
    })
    .bind(bind)?
    .run()
    .await?;

    // Server is down; let the scanner finish any in-flight pass and stop.
    let _ = shutdown_tx.send(true);
    let _ = scanner_task.await;

    Ok(())
}

use actix_web::{
    delete, get, post, put,
    web::{self, Data},
    HttpResponse, Responder,
};
use serde::Deserialize;

use crate::{db, errors::AppError, notifications, sessions::AdminUser, utils, AppState};

#[get("/api/admin/users")]
pub async fn list_users_handler(
    AdminUser(_session): AdminUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let users = db::get_all_users(&state.db_pool).await?;
    Ok(HttpResponse::Ok().json(users))
}

#[derive(Deserialize)]
pub struct UserPatch {
    email: Option<String>,
    fullname: Option<String>,
    is_admin: Option<bool>,
    password: Option<String>,
}

#[put("/api/admin/users/{id}")]
pub async fn update_user_handler(
    AdminUser(_session): AdminUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<UserPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let password_hash = match &form.password {
        Some(password) => Some(utils::hash_password(password)?),
        None => None,
    };
    let user = db::update_user(
        &state.db_pool,
        path.into_inner(),
        form.email.as_deref(),
        form.fullname.as_deref(),
        form.is_admin,
        password_hash.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(user))
}

#[delete("/api/admin/users/{id}")]
pub async fn delete_user_handler(
    AdminUser(session): AdminUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let id = path.into_inner();
    if id == session.user_id {
        return Err(AppError::Validation("cannot delete your own account".into()));
    }
    db::delete_user(&state.db_pool, id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== market assets ====================

#[get("/api/admin/market-assets")]
pub async fn list_market_assets_handler(
    AdminUser(_session): AdminUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let assets = db::get_market_assets(&state.db_pool).await?;
    Ok(HttpResponse::Ok().json(assets))
}

#[derive(Deserialize)]
pub struct NewMarketAsset {
    symbol: String,
    name: String,
    kind: String,
    api_key: Option<String>,
    api_source: Option<String>,
    enabled: Option<bool>,
}

#[post("/api/admin/market-assets")]
pub async fn create_market_asset_handler(
    AdminUser(_session): AdminUser,
    web::Json(form): web::Json<NewMarketAsset>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.symbol.is_empty() || form.name.is_empty() {
        return Err(AppError::Validation("symbol and name are required".into()));
    }
    let asset = db::create_market_asset(
        &state.db_pool,
        &form.symbol,
        &form.name,
        &form.kind,
        form.api_key.as_deref(),
        form.api_source.as_deref(),
        form.enabled.unwrap_or(true),
    )
    .await?;
    Ok(HttpResponse::Created().json(asset))
}

#[derive(Deserialize)]
pub struct MarketAssetPatch {
    symbol: Option<String>,
    name: Option<String>,
    kind: Option<String>,
    api_key: Option<String>,
    api_source: Option<String>,
    enabled: Option<bool>,
}

#[put("/api/admin/market-assets/{id}")]
pub async fn update_market_asset_handler(
    AdminUser(_session): AdminUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<MarketAssetPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let asset = db::update_market_asset(
        &state.db_pool,
        path.into_inner(),
        form.symbol.as_deref(),
        form.name.as_deref(),
        form.kind.as_deref(),
        form.api_key.as_deref(),
        form.api_source.as_deref(),
        form.enabled,
    )
    .await?;
    Ok(HttpResponse::Ok().json(asset))
}

#[delete("/api/admin/market-assets/{id}")]
pub async fn delete_market_asset_handler(
    AdminUser(_session): AdminUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_market_asset(&state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== broadcast / settings / credentials ====================

#[derive(Deserialize)]
pub struct BroadcastForm {
    title: String,
    message: String,
}

#[post("/api/admin/broadcast")]
pub async fn broadcast_handler(
    AdminUser(session): AdminUser,
    web::Json(form): web::Json<BroadcastForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.title.is_empty() || form.message.is_empty() {
        return Err(AppError::Validation("title and message are required".into()));
    }
    let notification = notifications::broadcast(&state.db_pool, &form.title, &form.message).await?;
    log::info!("Admin {} broadcast notification {}", session.username, notification.id);
    Ok(HttpResponse::Created()
        .json(serde_json::json!({ "id": notification.id, "success": true })))
}

#[get("/api/admin/settings")]
pub async fn get_settings_handler(
    AdminUser(_session): AdminUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let settings = db::get_settings(&state.db_pool).await?;
    Ok(HttpResponse::Ok().json(settings))
}

#[put("/api/admin/settings")]
pub async fn update_settings_handler(
    AdminUser(_session): AdminUser,
    web::Json(form): web::Json<serde_json::Map<String, serde_json::Value>>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::update_settings(&state.db_pool, &form).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct CredentialsForm {
    username: String,
    password: String,
}

#[put("/api/admin/credentials")]
pub async fn update_credentials_handler(
    AdminUser(session): AdminUser,
    web::Json(form): web::Json<CredentialsForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.username.is_empty() || form.password.is_empty() {
        return Err(AppError::Validation("username and password are required".into()));
    }
    let password_hash = utils::hash_password(&form.password)?;
    db::update_admin_credentials(&state.db_pool, &form.username, &password_hash).await?;
    log::info!("Admin credentials rotated by {}", session.username);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

use actix_web::{
    delete, get, post, put,
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    db,
    errors::AppError,
    installments::{self, InstallmentPatch, NewInstallment},
    notifications,
    sessions::{bearer_token, AuthedUser, Session, SessionStore},
    utils, AppState,
};

// ==================== auth ====================

#[derive(Deserialize)]
pub struct RegisterForm {
    username: String,
    email: String,
    fullname: Option<String>,
    password: String,
}

#[post("/api/register")]
pub async fn register_handler(
    web::Json(form): web::Json<RegisterForm>,
    state: Data<AppState>,
    sessions: Data<SessionStore>,
) -> Result<impl Responder, AppError> {
    if form.username.is_empty() || form.email.is_empty() || form.password.is_empty() {
        return Err(AppError::Validation("missing required fields".into()));
    }
    if !form.email.contains('@') || !form.email.contains('.') {
        return Err(AppError::Validation("invalid email format".into()));
    }
    if form.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters long".into(),
        ));
    }

    if db::get_user_by_username(&state.db_pool, &form.username).await?.is_some()
        || db::get_user_by_email(&state.db_pool, &form.email).await?.is_some()
    {
        return Err(AppError::Validation("user already exists".into()));
    }

    let fullname = form.fullname.unwrap_or_else(|| form.username.clone());
    let password_hash = utils::hash_password(&form.password)?;
    let user = db::create_user(
        &state.db_pool,
        &form.username,
        &form.email,
        &fullname,
        &password_hash,
        false,
    )
    .await?;

    let token = sessions.create(Session {
        user_id: user.id,
        username: user.username.clone(),
        is_admin: user.is_admin,
    });

    Ok(HttpResponse::Created().json(serde_json::json!({ "token": token, "user": user })))
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[post("/api/login")]
pub async fn login_handler(
    web::Json(form): web::Json<LoginForm>,
    state: Data<AppState>,
    sessions: Data<SessionStore>,
) -> Result<impl Responder, AppError> {
    let user = match db::get_user_by_username(&state.db_pool, &form.username).await? {
        Some(user) => user,
        None => return Err(AppError::Unauthorized),
    };
    if !utils::verify_password(&form.password, &user.password_hash)? {
        log::warn!("Failed login attempt for {}", form.username);
        return Err(AppError::Unauthorized);
    }

    sessions.purge_expired();
    let token = sessions.create(Session {
        user_id: user.id,
        username: user.username.clone(),
        is_admin: user.is_admin,
    });
    log::info!("User {} logged in", user.username);

    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token, "user": user })))
}

#[post("/api/logout")]
pub async fn logout_handler(
    request: HttpRequest,
    sessions: Data<SessionStore>,
) -> Result<impl Responder, AppError> {
    if let Some(token) = bearer_token(&request) {
        sessions.destroy(token);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[get("/api/me")]
pub async fn me_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = db::get_user_by_id(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(user))
}

// ==================== assets ====================

#[get("/api/assets")]
pub async fn list_assets_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let assets = db::get_assets_by_user(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(assets))
}

#[derive(Deserialize)]
pub struct NewAsset {
    symbol: String,
    name: String,
    kind: String,
    amount: f64,
    buy_price: f64,
    notes: Option<String>,
}

#[post("/api/assets")]
pub async fn create_asset_handler(
    AuthedUser(session): AuthedUser,
    web::Json(form): web::Json<NewAsset>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.symbol.is_empty() || form.name.is_empty() {
        return Err(AppError::Validation("symbol and name are required".into()));
    }
    let asset = db::create_asset(
        &state.db_pool,
        session.user_id,
        &form.symbol,
        &form.name,
        &form.kind,
        form.amount,
        form.buy_price,
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Created().json(asset))
}

#[derive(Deserialize)]
pub struct AssetPatch {
    amount: Option<f64>,
    buy_price: Option<f64>,
    notes: Option<String>,
}

#[put("/api/assets/{id}")]
pub async fn update_asset_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<AssetPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let asset = db::update_asset(
        &state.db_pool,
        path.into_inner(),
        session.user_id,
        form.amount,
        form.buy_price,
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(asset))
}

#[delete("/api/assets/{id}")]
pub async fn delete_asset_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_asset(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== transactions ====================

#[get("/api/transactions")]
pub async fn list_transactions_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let transactions = db::get_transactions_by_user(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(transactions))
}

#[derive(Deserialize)]
pub struct NewTransaction {
    kind: String,
    title: String,
    amount: f64,
    category: String,
    date: NaiveDate,
    direction: Option<String>,
    notes: Option<String>,
}

#[post("/api/transactions")]
pub async fn create_transaction_handler(
    AuthedUser(session): AuthedUser,
    web::Json(form): web::Json<NewTransaction>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.title.is_empty() {
        return Err(AppError::Validation("title is required".into()));
    }
    let transaction = db::create_transaction(
        &state.db_pool,
        session.user_id,
        &form.kind,
        &form.title,
        form.amount,
        &form.category,
        form.date,
        form.direction.as_deref(),
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Created().json(transaction))
}

#[derive(Deserialize)]
pub struct TransactionPatch {
    title: Option<String>,
    amount: Option<f64>,
    category: Option<String>,
    notes: Option<String>,
}

#[put("/api/transactions/{id}")]
pub async fn update_transaction_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<TransactionPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let transaction = db::update_transaction(
        &state.db_pool,
        path.into_inner(),
        session.user_id,
        form.title.as_deref(),
        form.amount,
        form.category.as_deref(),
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(transaction))
}

#[delete("/api/transactions/{id}")]
pub async fn delete_transaction_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_transaction(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== projects ====================

#[get("/api/projects")]
pub async fn list_projects_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let projects = db::get_projects_by_user(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(projects))
}

#[derive(Deserialize)]
pub struct NewProject {
    title: String,
    total_amount: f64,
    #[serde(default)]
    paid_amount: f64,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    status: Option<String>,
    notes: Option<String>,
}

#[post("/api/projects")]
pub async fn create_project_handler(
    AuthedUser(session): AuthedUser,
    web::Json(form): web::Json<NewProject>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.title.is_empty() {
        return Err(AppError::Validation("title is required".into()));
    }
    let project = db::create_project(
        &state.db_pool,
        session.user_id,
        &form.title,
        form.total_amount,
        form.paid_amount,
        form.start_date,
        form.end_date,
        form.status.as_deref().unwrap_or("active"),
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Created().json(project))
}

#[derive(Deserialize)]
pub struct ProjectPatch {
    title: Option<String>,
    total_amount: Option<f64>,
    paid_amount: Option<f64>,
    status: Option<String>,
    notes: Option<String>,
}

#[put("/api/projects/{id}")]
pub async fn update_project_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<ProjectPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let project = db::update_project(
        &state.db_pool,
        path.into_inner(),
        session.user_id,
        form.title.as_deref(),
        form.total_amount,
        form.paid_amount,
        form.status.as_deref(),
        form.notes.as_deref(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(project))
}

#[delete("/api/projects/{id}")]
pub async fn delete_project_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    db::delete_project(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== installments ====================

#[get("/api/installments")]
pub async fn list_installments_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let installments =
        installments::get_installments_by_user(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(installments))
}

#[post("/api/installments")]
pub async fn create_installment_handler(
    AuthedUser(session): AuthedUser,
    web::Json(form): web::Json<NewInstallment>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let installment =
        installments::create_installment(&state.db_pool, session.user_id, &form).await?;
    Ok(HttpResponse::Created().json(installment))
}

#[put("/api/installments/{id}")]
pub async fn update_installment_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    web::Json(form): web::Json<InstallmentPatch>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let installment =
        installments::update_installment(&state.db_pool, path.into_inner(), session.user_id, &form)
            .await?;
    Ok(HttpResponse::Ok().json(installment))
}

#[delete("/api/installments/{id}")]
pub async fn delete_installment_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    installments::delete_installment(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[post("/api/installments/{id}/pay")]
pub async fn pay_installment_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let installment =
        installments::register_payment(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(installment))
}

// ==================== notifications ====================

#[get("/api/notifications")]
pub async fn list_notifications_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let notifications = notifications::list_for(&state.db_pool, session.user_id).await?;
    Ok(HttpResponse::Ok().json(notifications))
}

#[post("/api/notifications/mark-read/{id}")]
pub async fn mark_notification_read_handler(
    AuthedUser(session): AuthedUser,
    path: web::Path<i64>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    notifications::mark_read(&state.db_pool, path.into_inner(), session.user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

// ==================== portfolio target ====================

#[get("/api/portfolio-target")]
pub async fn get_portfolio_target_handler(
    AuthedUser(session): AuthedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let target = db::get_portfolio_target(&state.db_pool, session.user_id).await?;
    match target {
        Some(target) => Ok(HttpResponse::Ok().json(target)),
        None => Ok(HttpResponse::Ok().json(serde_json::json!({}))),
    }
}

#[derive(Deserialize)]
pub struct TargetForm {
    #[serde(default)]
    crypto: f64,
    #[serde(default)]
    currency: f64,
    #[serde(default)]
    gold: f64,
    #[serde(default)]
    stock: f64,
}

#[post("/api/portfolio-target")]
pub async fn set_portfolio_target_handler(
    AuthedUser(session): AuthedUser,
    web::Json(form): web::Json<TargetForm>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let target = db::set_portfolio_target(
        &state.db_pool,
        session.user_id,
        form.crypto,
        form.currency,
        form.gold,
        form.stock,
    )
    .await?;
    Ok(HttpResponse::Ok().json(target))
}

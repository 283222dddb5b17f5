use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::extractors::AuthUser;
use crate::models::user::normalize_email;
use crate::models::{User, UserRole};
use crate::services::auth::{
    hash_password_async, verify_password_async, IssuedToken, MIN_PASSWORD_LENGTH,
};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Serialize)]
pub struct Session {
    pub user: User,
    #[serde(flatten)]
    pub token: IssuedToken,
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !valid || email.contains(char::is_whitespace) {
        return Err(AppError::ValidationError("Invalid email address".to_string()));
    }
    Ok(())
}

fn clean_phone(phone: Option<String>) -> Result<Option<String>, AppError> {
    let Some(phone) = phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    if !(10..=15).contains(&digits)
        || !phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-'))
    {
        return Err(AppError::ValidationError("Invalid phone number".to_string()));
    }
    Ok(Some(phone))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::ValidationError("Name is required".to_string()));
    }
    let email = normalize_email(&req.email);
    validate_email(&email)?;
    if req.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    let phone = clean_phone(req.phone)?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let password_hash = hash_password_async(req.password).await?;
    let user = User::new(name, email, phone, req.role, password_hash);
    state.store.insert_user(&user).await?;
    let token = state.tokens.issue(&user)?;

    tracing::info!(user_id = %user.id, role = ?user.role, "User registered");
    Ok(created(Session { user, token }, "Account created"))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&req.email);
    let invalid = || AppError::AuthError(INVALID_CREDENTIALS.to_string());
    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password_async(req.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = state.tokens.issue(&user)?;
    tracing::info!(user_id = %user.id, "User logged in");
    Ok(success(Session { user, token }, "Logged in"))
}

pub async fn me(AuthUser(user): AuthUser) -> Response {
    success(user, "Current user")
}

pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(mut user): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Response, AppError> {
    if let Some(name) = req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("Name cannot be empty".to_string()));
        }
        user.name = name.to_string();
    }
    if req.phone.is_some() {
        user.phone = clean_phone(req.phone)?;
    }
    user.updated_at = chrono::Utc::now();

    state.store.update_user(&user).await?;
    Ok(success(user, "Profile updated"))
}

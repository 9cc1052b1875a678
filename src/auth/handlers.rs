use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{AuthService, AuthenticatedUser};
use crate::error::{AppError, AuthError, FieldErrors};
use crate::handlers::require_text;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

pub async fn login(
    state: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();

    let mut errors = FieldErrors::new();
    require_text(&mut errors, "username", payload.username.as_deref());
    require_text(&mut errors, "password", payload.password.as_deref());
    errors.into_result()?;

    let username = payload.username.unwrap_or_default();
    let password = payload.password.unwrap_or_default();
    info!("Received login request for user: {}", username);

    let user = match state.db.get_user_by_username(&username).await? {
        Some(user) if AuthService::verify_password(&password, &user.password_hash) => user,
        _ => {
            warn!("Login failed for user: {}", username);
            return Err(AppError::AuthError(AuthError::InvalidCredentials));
        }
    };

    if !user.is_active {
        warn!("Login rejected for inactive user: {}", username);
        return Err(AppError::AuthError(AuthError::InactiveAccount));
    }

    let principal = AuthenticatedUser::load(&state.db, &user).await?;
    let tokens = state.auth.issue_tokens(&principal)?;

    info!("Login successful for user: {}", username);
    Ok(HttpResponse::Ok().json(tokens))
}

pub async fn refresh(
    state: web::Data<AppState>,
    payload: web::Json<RefreshRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();

    let mut errors = FieldErrors::new();
    require_text(&mut errors, "refresh", payload.refresh.as_deref());
    errors.into_result()?;

    let token = payload.refresh.unwrap_or_default();
    let user_id = state.auth.refresh_subject(&token)?;

    let user = state
        .db
        .get_user_by_id(user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or(AppError::AuthError(AuthError::InvalidToken))?;

    let principal = AuthenticatedUser::load(&state.db, &user).await?;
    let access = state.auth.issue_access_token(&principal)?;

    Ok(HttpResponse::Ok().json(json!({ "access": access })))
}

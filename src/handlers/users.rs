use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{can_edit_profile, Access, AuthService, AuthenticatedUser};
use crate::db::{Role, User, UserChanges};
use crate::error::{AppError, DatabaseError, FieldErrors};
use crate::handlers::{max_length, require_text, text_or_empty};
use crate::logging::mask_sensitive;
use crate::AppState;

const USERNAME_MAX: usize = 150;
const PASSWORD_MIN: usize = 8;
const USERNAME_TAKEN: &str = "A user with that username already exists.";

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

fn user_detail(user: &User) -> serde_json::Value {
    json!({
        "username": user.username,
        "email": text_or_empty(&user.email),
        "first_name": text_or_empty(&user.first_name),
        "last_name": text_or_empty(&user.last_name),
    })
}

fn valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

pub(crate) fn valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn check_username(errors: &mut FieldErrors, username: Option<&str>) {
    require_text(errors, "username", username);
    max_length(errors, "username", username, USERNAME_MAX);
    if let Some(username) = username {
        if !username.trim().is_empty() && !valid_username(username) {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        }
    }
}

fn check_password(errors: &mut FieldErrors, password: Option<&str>) {
    require_text(errors, "password", password);
    if let Some(password) = password {
        if !password.is_empty() && password.chars().count() < PASSWORD_MIN {
            errors.add(
                "password",
                format!("Ensure this field has at least {} characters.", PASSWORD_MIN),
            );
        }
    }
}

/// Blank optional strings are stored as NULL.
fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_email(errors: &mut FieldErrors, email: Option<&str>) {
    if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
        if !valid_email(email) {
            errors.add("email", "Enter a valid email address.");
        }
    }
}

/// Unique-constraint races on the username surface as a field error.
fn username_conflict(err: AppError) -> AppError {
    match err {
        AppError::DatabaseError(DatabaseError::Duplicate) => AppError::field("username", USERNAME_TAKEN),
        other => other,
    }
}

pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    debug!(payload = %mask_sensitive(&json!(payload)), "Registration payload");

    let mut errors = FieldErrors::new();
    check_username(&mut errors, payload.username.as_deref());
    check_password(&mut errors, payload.password.as_deref());
    check_email(&mut errors, payload.email.as_deref());
    max_length(&mut errors, "first_name", payload.first_name.as_deref(), 150);
    max_length(&mut errors, "last_name", payload.last_name.as_deref(), 150);
    errors.into_result()?;

    let username = payload.username.unwrap_or_default().trim().to_string();
    let password = payload.password.unwrap_or_default();

    if state.db.username_taken(&username, None).await? {
        return Err(AppError::field("username", USERNAME_TAKEN));
    }

    let mut user = User::new(username, AuthService::hash_password(&password)?, Role::User);
    user.email = normalize_optional(payload.email);
    user.first_name = normalize_optional(payload.first_name);
    user.last_name = normalize_optional(payload.last_name);

    let user = state.db.create_user(&user).await.map_err(username_conflict)?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok(HttpResponse::Created().json(json!({
        "id": user.id,
        "username": user.username,
    })))
}

pub async fn list_users(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let users: Vec<UserSummary> = state
        .db
        .list_users()
        .await?
        .into_iter()
        .map(UserSummary::from)
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "users": users })))
}

pub async fn get_user(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user = state
        .db
        .get_user_by_id(path.into_inner())
        .await?
        .ok_or_else(|| AppError::not_found("User not found."))?;

    Ok(HttpResponse::Ok().json(user_detail(&user)))
}

pub async fn update_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if !can_edit_profile(&user, id) {
        return Err(AppError::forbidden());
    }
    if !state.db.user_exists(id).await? {
        return Err(AppError::not_found("User not found."));
    }

    let payload = payload.into_inner();
    debug!(payload = %mask_sensitive(&json!(payload)), "Profile update payload");

    let mut errors = FieldErrors::new();
    if payload.username.is_some() {
        check_username(&mut errors, payload.username.as_deref());
    }
    if payload.password.is_some() {
        check_password(&mut errors, payload.password.as_deref());
    }
    check_email(&mut errors, payload.email.as_deref());
    max_length(&mut errors, "first_name", payload.first_name.as_deref(), 150);
    max_length(&mut errors, "last_name", payload.last_name.as_deref(), 150);
    errors.into_result()?;

    let username = payload.username.map(|u| u.trim().to_string());
    if let Some(username) = &username {
        if state.db.username_taken(username, Some(id)).await? {
            return Err(AppError::field("username", USERNAME_TAKEN));
        }
    }

    let password_hash = match payload.password.as_deref() {
        Some(password) => Some(AuthService::hash_password(password)?),
        None => None,
    };

    let changes = UserChanges {
        username,
        email: payload.email.map(|e| e.trim().to_string()),
        first_name: payload.first_name.map(|n| n.trim().to_string()),
        last_name: payload.last_name.map(|n| n.trim().to_string()),
        password_hash,
    };

    let updated = state.db.update_user(id, changes).await.map_err(username_conflict)?;
    info!("User {} updated their profile", updated.username);

    Ok(HttpResponse::Ok().json(user_detail(&updated)))
}

pub async fn delete_user(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.delete_user(id).await? {
        return Err(AppError::not_found("User not found."));
    }

    info!("User {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        let check = |name: Option<&str>| {
            let mut errors = FieldErrors::new();
            check_username(&mut errors, name);
            errors
        };

        assert!(check(Some("ada.lovelace+1@x")).is_empty());
        assert!(!check(None).is_empty());
        assert!(!check(Some("")).is_empty());
        assert!(!check(Some("has space")).is_empty());
        assert!(!check(Some(&"a".repeat(151))).is_empty());
        assert!(check(Some(&"a".repeat(150))).is_empty());
    }

    #[test]
    fn test_password_rules() {
        let check = |password: Option<&str>| {
            let mut errors = FieldErrors::new();
            check_password(&mut errors, password);
            errors
        };

        assert!(check(Some("12345678")).is_empty());
        assert!(!check(Some("1234567")).is_empty());
        assert!(!check(None).is_empty());
    }

    #[test]
    fn test_email_rules() {
        assert!(valid_email("ada@example.com"));
        assert!(valid_email("a.b+c@mail.example.co.id"));
        assert!(!valid_email("ada"));
        assert!(!valid_email("ada@"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("ada@example"));
        assert!(!valid_email("ada@@example.com"));
        assert!(!valid_email("ada @example.com"));

        let mut errors = FieldErrors::new();
        check_email(&mut errors, Some(""));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_user_detail_renders_blanks() {
        let user = User::new("ada".into(), "hash".into(), Role::User);
        let detail = user_detail(&user);
        assert_eq!(detail["username"], "ada");
        assert_eq!(detail["email"], "");
        assert_eq!(detail["first_name"], "");
        assert_eq!(detail["last_name"], "");
        assert!(detail.get("password_hash").is_none());
    }
}

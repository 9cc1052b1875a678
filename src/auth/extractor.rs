use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{FutureExt, LocalBoxFuture};
use tracing::warn;
use uuid::Uuid;

use crate::db::{DbOperations, Role, User};
use crate::error::{AppError, AuthError};
use crate::AppState;

/// The caller behind a valid access token, as currently stored.
///
/// Used directly as a handler argument: extraction fails with 401 when the
/// `Authorization: Bearer` header is missing, malformed, expired or holds a
/// refresh token, and when the user it names is gone or inactive. Role and
/// groups come from the database, so a revoked membership applies to the
/// next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub groups: Vec<String>,
}

impl AuthenticatedUser {
    /// Builds the principal for a stored user, with fresh group names.
    pub async fn load(db: &DbOperations, user: &User) -> Result<Self, AppError> {
        let groups = db.get_user_group_names(user.id).await?;
        Ok(Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            groups,
        })
    }
}

/// Token part of an `Authorization: Bearer <token>` header, if present.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let identity = token_identity(req);
        async move {
            let (state, user_id) = identity?;
            authenticate(&state, user_id).await
        }
        .boxed_local()
    }
}

/// Validates the token synchronously so the future owns nothing borrowed.
fn token_identity(req: &HttpRequest) -> Result<(web::Data<AppState>, Uuid), AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::InternalError("Application state is not configured".into()))?;

    let token = bearer_token(req).ok_or(AppError::AuthError(AuthError::MissingCredentials))?;
    let user_id = state.auth.authenticate(token)?.user_id()?;

    Ok((state, user_id))
}

async fn authenticate(state: &AppState, user_id: Uuid) -> Result<AuthenticatedUser, AppError> {
    match state.db.get_user_by_id(user_id).await? {
        Some(user) if user.is_active => AuthenticatedUser::load(&state.db, &user).await,
        Some(user) => {
            warn!("Rejected token for inactive user {}", user.username);
            Err(AppError::AuthError(AuthError::InactiveAccount))
        }
        None => {
            warn!("Rejected token for unknown user {}", user_id);
            Err(AppError::AuthError(AuthError::InvalidToken))
        }
    }
}

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{Access, AuthenticatedUser};
use crate::error::{AppError, DatabaseError, FieldErrors};
use crate::handlers::{max_length, require, require_text};
use crate::AppState;

const GROUP_NAME_TAKEN: &str = "group with this name already exists.";

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub user_id: Option<Uuid>,
}

async fn validated_name(
    state: &AppState,
    payload: GroupRequest,
    exclude: Option<i32>,
) -> Result<String, AppError> {
    let mut errors = FieldErrors::new();
    require_text(&mut errors, "name", payload.name.as_deref());
    max_length(&mut errors, "name", payload.name.as_deref(), 150);
    errors.into_result()?;

    let name = payload.name.unwrap_or_default().trim().to_string();
    if state.db.group_name_taken(&name, exclude).await? {
        return Err(AppError::field("name", GROUP_NAME_TAKEN));
    }
    Ok(name)
}

fn name_conflict(err: AppError) -> AppError {
    match err {
        AppError::DatabaseError(DatabaseError::Duplicate) => AppError::field("name", GROUP_NAME_TAKEN),
        other => other,
    }
}

pub async fn list_groups(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let groups = state.db.list_groups().await?;
    Ok(HttpResponse::Ok().json(json!({ "groups": groups })))
}

pub async fn create_group(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    payload: web::Json<GroupRequest>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let name = validated_name(&state, payload.into_inner(), None).await?;
    let group = state.db.create_group(&name).await.map_err(name_conflict)?;

    info!("Group {} created by {}", group.name, user.username);
    Ok(HttpResponse::Created().json(group))
}

pub async fn get_group(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let group = state
        .db
        .get_group(path.into_inner())
        .await?
        .ok_or_else(|| AppError::not_found("Group not found."))?;

    Ok(HttpResponse::Ok().json(group))
}

pub async fn update_group(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
    payload: web::Json<GroupRequest>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let id = path.into_inner();
    if state.db.get_group(id).await?.is_none() {
        return Err(AppError::not_found("Group not found."));
    }

    let name = validated_name(&state, payload.into_inner(), Some(id)).await?;
    let group = state.db.rename_group(id, &name).await.map_err(name_conflict)?;

    info!("Group {} renamed to {} by {}", id, group.name, user.username);
    Ok(HttpResponse::Ok().json(group))
}

pub async fn delete_group(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let id = path.into_inner();
    if !state.db.delete_group(id).await? {
        return Err(AppError::not_found("Group not found."));
    }

    info!("Group {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

pub async fn add_member(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<i32>,
    payload: web::Json<MemberRequest>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let group_id = path.into_inner();
    let payload = payload.into_inner();

    let mut errors = FieldErrors::new();
    let member = require(&mut errors, "user_id", &payload.user_id).copied();
    errors.into_result()?;
    let member = member.unwrap_or_default();

    let group = state
        .db
        .get_group(group_id)
        .await?
        .ok_or_else(|| AppError::not_found("Group not found."))?;
    if !state.db.user_exists(member).await? {
        return Err(AppError::field("user_id", "User not found."));
    }

    state.db.add_group_member(group_id, member).await?;

    info!("User {} added to group {} by {}", member, group.name, user.username);
    Ok(HttpResponse::Created().json(json!({
        "group_id": group_id,
        "user_id": member,
    })))
}

pub async fn remove_member(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<(i32, Uuid)>,
) -> Result<HttpResponse, AppError> {
    Access::SuperuserOnly.check(&user)?;

    let (group_id, member) = path.into_inner();
    if !state.db.remove_group_member(group_id, member).await? {
        return Err(AppError::not_found("Membership not found."));
    }

    info!("User {} removed from group {} by {}", member, group_id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

use actix_web::{web, HttpResponse};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Access, AuthenticatedUser};
use crate::cache::CacheKey;
use crate::db::{RegistrationDetails, RegistrationOutcome};
use crate::error::{AppError, FieldErrors};
use crate::handlers::{cached, require};
use crate::reminders::ReminderJob;
use crate::AppState;

const REGISTRATION_NOT_FOUND: &str = "Registration not found.";
pub const ALREADY_REGISTERED: &str = "User is already registered for this ticket.";
pub const QUOTA_REACHED: &str = "Ticket quota has been reached.";

#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    pub ticket_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

impl RegistrationRequest {
    fn validate(&self) -> Result<(Uuid, Uuid), AppError> {
        let mut errors = FieldErrors::new();
        let ticket_id = require(&mut errors, "ticket_id", &self.ticket_id).copied();
        let user_id = require(&mut errors, "user_id", &self.user_id).copied();
        errors.into_result()?;
        Ok((ticket_id.unwrap_or_default(), user_id.unwrap_or_default()))
    }
}

/// The saved registration's id, or the 400 for a rejected placement.
fn saved_id(outcome: RegistrationOutcome) -> Result<Uuid, AppError> {
    match outcome {
        RegistrationOutcome::Saved(registration) => Ok(registration.id),
        RegistrationOutcome::AlreadyRegistered => Err(AppError::non_field(ALREADY_REGISTERED)),
        RegistrationOutcome::QuotaReached => Err(AppError::non_field(QUOTA_REACHED)),
        RegistrationOutcome::TicketMissing => Err(AppError::field("ticket_id", "Ticket not found.")),
    }
}

async fn place(
    state: &AppState,
    id: Option<Uuid>,
    payload: &RegistrationRequest,
) -> Result<Uuid, AppError> {
    let (ticket_id, user_id) = payload.validate()?;

    let mut errors = FieldErrors::new();
    if !state.db.ticket_exists(ticket_id).await? {
        errors.add("ticket_id", "Ticket not found.");
    }
    if !state.db.user_exists(user_id).await? {
        errors.add("user_id", "User not found.");
    }
    errors.into_result()?;

    let outcome = match id {
        None => state.db.create_registration(ticket_id, user_id).await?,
        Some(id) => state.db.update_registration(id, ticket_id, user_id).await?,
    };
    saved_id(outcome)
}

fn registration_list_item(row: &RegistrationDetails) -> Value {
    let registration = &row.registration;
    json!({
        "id": registration.id,
        "ticket": {
            "id": registration.ticket_id,
            "name": row.ticket_name,
            "price": row.ticket_price.to_f64(),
        },
        "user": {
            "id": registration.user_id,
            "username": row.username,
        },
        "event": {
            "id": row.event_id,
            "name": row.event_name,
        },
        "created_at": registration.created_at,
        "updated_at": registration.updated_at,
    })
}

fn registration_detail(row: &RegistrationDetails) -> Value {
    let registration = &row.registration;
    json!({
        "id": registration.id,
        "ticket": row.ticket_name,
        "user": row.username,
        "event": row.event_name,
        "created_at": registration.created_at,
        "updated_at": registration.updated_at,
    })
}

/// Payment bodies embed the registration's user and ticket names.
async fn invalidate_registration(state: &AppState, id: Uuid) {
    state
        .cache
        .delete(&[
            CacheKey::registration(id),
            CacheKey::REGISTRATIONS.to_string(),
            CacheKey::PAYMENTS.to_string(),
        ])
        .await;
}

async fn find_registration(state: &AppState, id: Uuid) -> Result<RegistrationDetails, AppError> {
    state
        .db
        .get_registration(id)
        .await?
        .ok_or_else(|| AppError::not_found(REGISTRATION_NOT_FOUND))
}

pub async fn list_registrations(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    cached(&state, CacheKey::REGISTRATIONS, async {
        let registrations = state.db.list_registrations().await?;
        Ok(json!({
            "registrations": registrations.iter().map(registration_list_item).collect::<Vec<_>>(),
        }))
    })
    .await
}

pub async fn create_registration(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    payload: web::Json<RegistrationRequest>,
) -> Result<HttpResponse, AppError> {
    Access::Authenticated.check(&user)?;

    let id = place(&state, None, &payload).await?;
    invalidate_registration(&state, id).await;

    // The email is a side effect; a full queue must not fail the registration.
    match state.reminders.enqueue(ReminderJob::NewRegistration(id)) {
        Ok(task_id) => info!("Reminder check {} queued for registration {}", task_id, id),
        Err(e) => warn!("Reminder check for registration {} was not queued: {}", id, e),
    }

    let created = find_registration(&state, id).await?;
    info!("Registration {} created by {}", id, user.username);
    Ok(HttpResponse::Created().json(json!({
        "id": created.registration.id,
        "ticket": created.ticket_name,
        "user": created.username,
    })))
}

pub async fn get_registration(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::Authenticated.check(&user)?;

    let id = path.into_inner();
    cached(&state, &CacheKey::registration(id), async {
        let registration = find_registration(&state, id).await?;
        Ok(registration_detail(&registration))
    })
    .await
}

pub async fn update_registration(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<RegistrationRequest>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.registration_exists(id).await? {
        return Err(AppError::not_found(REGISTRATION_NOT_FOUND));
    }

    place(&state, Some(id), &payload).await?;
    invalidate_registration(&state, id).await;

    let updated = find_registration(&state, id).await?;
    info!("Registration {} updated by {}", id, user.username);
    Ok(HttpResponse::Ok().json(registration_detail(&updated)))
}

pub async fn delete_registration(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.delete_registration(id).await? {
        return Err(AppError::not_found(REGISTRATION_NOT_FOUND));
    }

    invalidate_registration(&state, id).await;
    state.cache.delete_pattern(CacheKey::PAYMENT_DETAILS).await;

    info!("Registration {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

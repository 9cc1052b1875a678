use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{Access, AuthenticatedUser};
use crate::cache::CacheKey;
use crate::db::{Ticket, TicketFields, TicketWithEvent};
use crate::error::{AppError, FieldErrors};
use crate::handlers::{cached, max_length, money, non_negative, ordered, require, require_text};
use crate::AppState;

const TICKET_NOT_FOUND: &str = "Ticket not found.";

#[derive(Debug, Deserialize)]
pub struct TicketRequest {
    pub event_id: Option<Uuid>,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub sales_start: Option<DateTime<Utc>>,
    pub sales_end: Option<DateTime<Utc>>,
    pub quota: Option<i64>,
}

impl TicketRequest {
    fn validate(self) -> Result<TicketFields, AppError> {
        let mut errors = FieldErrors::new();

        let event_id = require(&mut errors, "event_id", &self.event_id).copied();
        require_text(&mut errors, "name", self.name.as_deref());
        max_length(&mut errors, "name", self.name.as_deref(), 255);
        let price = require(&mut errors, "price", &self.price).copied();
        money(&mut errors, "price", price);
        let sales_start = require(&mut errors, "sales_start", &self.sales_start).copied();
        let sales_end = require(&mut errors, "sales_end", &self.sales_end).copied();
        ordered(
            &mut errors,
            sales_start,
            sales_end,
            "sales_end",
            "Sales end must be after sales start.",
        );
        let quota = require(&mut errors, "quota", &self.quota).copied();
        non_negative(&mut errors, "quota", quota);
        if matches!(quota, Some(q) if q > i64::from(i32::MAX)) {
            errors.add("quota", format!("Ensure this value is less than or equal to {}.", i32::MAX));
        }

        errors.into_result()?;

        Ok(TicketFields {
            event_id: event_id.unwrap_or_default(),
            name: self.name.unwrap_or_default().trim().to_string(),
            price: price.unwrap_or_default().round_dp(2),
            sales_start: sales_start.unwrap_or_default(),
            sales_end: sales_end.unwrap_or_default(),
            quota: quota.and_then(|q| i32::try_from(q).ok()).unwrap_or_default(),
        })
    }
}

async fn validated_fields(state: &AppState, payload: TicketRequest) -> Result<TicketFields, AppError> {
    let fields = payload.validate()?;
    if !state.db.event_exists(fields.event_id).await? {
        return Err(AppError::field("event_id", "Event not found."));
    }
    Ok(fields)
}

/// Prices are rendered as JSON numbers.
fn price_number(price: Decimal) -> Value {
    price.to_f64().map(Value::from).unwrap_or(Value::Null)
}

fn ticket_summary(ticket: &Ticket) -> Value {
    json!({
        "id": ticket.id,
        "name": ticket.name,
        "price": price_number(ticket.price),
        "sales_start": ticket.sales_start,
        "sales_end": ticket.sales_end,
        "quota": ticket.quota,
    })
}

fn ticket_list_item(row: &TicketWithEvent) -> Value {
    let ticket = &row.ticket;
    json!({
        "id": ticket.id,
        "name": ticket.name,
        "price": price_number(ticket.price),
        "sales_start": ticket.sales_start,
        "sales_end": ticket.sales_end,
        "quota": ticket.quota,
        "event": {
            "id": ticket.event_id,
            "name": row.event_name,
        },
        "created_at": ticket.created_at,
        "updated_at": ticket.updated_at,
    })
}

fn ticket_detail(row: &TicketWithEvent) -> Value {
    let ticket = &row.ticket;
    json!({
        "id": ticket.id,
        "event": row.event_name,
        "name": ticket.name,
        "price": price_number(ticket.price),
        "sales_start": ticket.sales_start,
        "sales_end": ticket.sales_end,
        "quota": ticket.quota,
        "created_at": ticket.created_at,
        "updated_at": ticket.updated_at,
    })
}

/// Registration and payment bodies embed ticket names, so they go too.
async fn invalidate_ticket(state: &AppState, id: Uuid) {
    state
        .cache
        .delete(&[
            CacheKey::ticket(id),
            CacheKey::TICKETS.to_string(),
            CacheKey::REGISTRATIONS.to_string(),
            CacheKey::PAYMENTS.to_string(),
        ])
        .await;
    state.cache.delete_pattern(CacheKey::REGISTRATION_DETAILS).await;
}

async fn find_ticket(state: &AppState, id: Uuid) -> Result<TicketWithEvent, AppError> {
    state
        .db
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::not_found(TICKET_NOT_FOUND))
}

pub async fn list_tickets(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    cached(&state, CacheKey::TICKETS, async {
        let tickets = state.db.list_tickets().await?;
        Ok(json!({
            "tickets": tickets.iter().map(ticket_list_item).collect::<Vec<_>>(),
        }))
    })
    .await
}

pub async fn create_ticket(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    payload: web::Json<TicketRequest>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let fields = validated_fields(&state, payload.into_inner()).await?;
    let ticket = state.db.create_ticket(&fields).await?;

    state.cache.delete(&[CacheKey::TICKETS.to_string()]).await;

    info!("Ticket {} ({}) created by {}", ticket.name, ticket.id, user.username);
    Ok(HttpResponse::Created().json(ticket_summary(&ticket)))
}

pub async fn get_ticket(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    cached(&state, &CacheKey::ticket(id), async {
        let ticket = find_ticket(&state, id).await?;
        Ok(ticket_detail(&ticket))
    })
    .await
}

pub async fn update_ticket(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<TicketRequest>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.ticket_exists(id).await? {
        return Err(AppError::not_found(TICKET_NOT_FOUND));
    }

    let fields = validated_fields(&state, payload.into_inner()).await?;
    state.db.update_ticket(id, &fields).await?;
    invalidate_ticket(&state, id).await;

    let updated = find_ticket(&state, id).await?;
    info!("Ticket {} updated by {}", id, user.username);
    Ok(HttpResponse::Ok().json(ticket_detail(&updated)))
}

pub async fn delete_ticket(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.delete_ticket(id).await? {
        return Err(AppError::not_found(TICKET_NOT_FOUND));
    }

    invalidate_ticket(&state, id).await;
    state.cache.delete_pattern(CacheKey::PAYMENT_DETAILS).await;

    info!("Ticket {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

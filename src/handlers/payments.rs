use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::{Access, AuthenticatedUser};
use crate::cache::CacheKey;
use crate::db::{Payment, PaymentDetails, PaymentFields, PaymentMethod, PaymentStatus};
use crate::error::{AppError, FieldErrors};
use crate::handlers::{cached, money, parse_choice, require, REQUIRED};
use crate::AppState;

const PAYMENT_NOT_FOUND: &str = "Payment not found.";

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub registration_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub amount_paid: Option<Decimal>,
}

impl PaymentRequest {
    /// `current` is the stored payment on update; its registration and
    /// status fill in whatever the request leaves out.
    fn validate(self, current: Option<&Payment>) -> Result<PaymentFields, AppError> {
        let mut errors = FieldErrors::new();

        let registration_id = match (self.registration_id, current) {
            (Some(id), _) => Some(id),
            (None, Some(payment)) => Some(payment.registration_id),
            (None, None) => {
                errors.add("registration_id", REQUIRED);
                None
            }
        };

        if self.payment_method.is_none() {
            errors.add("payment_method", REQUIRED);
        }
        let payment_method: Option<PaymentMethod> =
            parse_choice(&mut errors, "payment_method", self.payment_method.as_deref());

        let payment_status = match self.payment_status.as_deref() {
            None => Some(current.map(|p| p.payment_status).unwrap_or_default()),
            Some(raw) => parse_choice(&mut errors, "payment_status", Some(raw)),
        };

        let amount_paid = require(&mut errors, "amount_paid", &self.amount_paid).copied();
        money(&mut errors, "amount_paid", amount_paid);

        errors.into_result()?;

        Ok(PaymentFields {
            registration_id: registration_id.unwrap_or_default(),
            payment_method: payment_method.unwrap_or(PaymentMethod::Qris),
            payment_status: payment_status.unwrap_or_default(),
            amount_paid: amount_paid.unwrap_or_default().round_dp(2),
        })
    }
}

async fn validated_fields(
    state: &AppState,
    payload: PaymentRequest,
    current: Option<&Payment>,
) -> Result<PaymentFields, AppError> {
    let fields = payload.validate(current)?;
    if !state.db.registration_exists(fields.registration_id).await? {
        return Err(AppError::field("registration_id", "Registration not found."));
    }
    Ok(fields)
}

fn payment_summary(payment: &Payment) -> Value {
    json!({
        "id": payment.id,
        "registration": payment.registration_id,
        "payment_method": payment.payment_method,
        "payment_status": payment.payment_status,
        "amount_paid": payment.amount_paid,
    })
}

fn payment_list_item(row: &PaymentDetails) -> Value {
    let payment = &row.payment;
    json!({
        "id": payment.id,
        "registration": {
            "id": payment.registration_id,
            "user": row.username,
            "ticket": row.ticket_name,
        },
        "payment_method": payment.payment_method,
        "payment_status": payment.payment_status,
        "amount_paid": payment.amount_paid,
        "created_at": payment.created_at,
        "updated_at": payment.updated_at,
    })
}

/// Detail bodies show the status label rather than its stored value.
fn payment_detail(payment: &Payment) -> Value {
    json!({
        "id": payment.id,
        "registration": payment.registration_id,
        "payment_method": payment.payment_method,
        "payment_status": payment.payment_status.label(),
        "amount_paid": payment.amount_paid,
        "created_at": payment.created_at,
        "updated_at": payment.updated_at,
    })
}

async fn invalidate_payment(state: &AppState, id: Uuid) {
    state
        .cache
        .delete(&[CacheKey::payment(id), CacheKey::PAYMENTS.to_string()])
        .await;
}

async fn find_payment(state: &AppState, id: Uuid) -> Result<Payment, AppError> {
    state
        .db
        .get_payment(id)
        .await?
        .ok_or_else(|| AppError::not_found(PAYMENT_NOT_FOUND))
}

pub async fn list_payments(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    cached(&state, CacheKey::PAYMENTS, async {
        let payments = state.db.list_payments().await?;
        Ok(json!({
            "payments": payments.iter().map(payment_list_item).collect::<Vec<_>>(),
        }))
    })
    .await
}

pub async fn create_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    payload: web::Json<PaymentRequest>,
) -> Result<HttpResponse, AppError> {
    Access::Authenticated.check(&user)?;

    let fields = validated_fields(&state, payload.into_inner(), None).await?;
    let payment = state.db.create_payment(&fields).await?;
    invalidate_payment(&state, payment.id).await;

    info!(
        "Payment {} of {} for registration {} recorded by {}",
        payment.id, payment.amount_paid, payment.registration_id, user.username
    );
    Ok(HttpResponse::Created().json(payment_summary(&payment)))
}

pub async fn get_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::Authenticated.check(&user)?;

    let id = path.into_inner();
    cached(&state, &CacheKey::payment(id), async {
        let payment = find_payment(&state, id).await?;
        Ok(payment_detail(&payment))
    })
    .await
}

pub async fn update_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    payload: web::Json<PaymentRequest>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    let current = find_payment(&state, id).await?;

    let fields = validated_fields(&state, payload.into_inner(), Some(&current)).await?;
    let payment = state.db.update_payment(id, &fields).await?;
    invalidate_payment(&state, id).await;

    info!(
        "Payment {} updated by {} (status {})",
        id,
        user.username,
        payment.payment_status.label()
    );
    Ok(HttpResponse::Ok().json(payment_detail(&payment)))
}

pub async fn delete_payment(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    Access::AdminOrSuperuser.check(&user)?;

    let id = path.into_inner();
    if !state.db.delete_payment(id).await? {
        return Err(AppError::not_found(PAYMENT_NOT_FOUND));
    }

    invalidate_payment(&state, id).await;

    info!("Payment {} deleted by {}", id, user.username);
    Ok(HttpResponse::NoContent().finish())
}

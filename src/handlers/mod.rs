//! HTTP handlers and routing
//!
//! One submodule per resource. Shared request validation, pagination and the
//! cached-response helper live here.

pub mod events;
pub mod groups;
pub mod payments;
pub mod registrations;
pub mod tickets;
pub mod users;

use std::future::Future;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::auth;
use crate::error::{AppError, FieldErrors};
use crate::AppState;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const NOT_NEGATIVE: &str = "Ensure this value is greater than or equal to 0.";

pub const DATA_SOURCE_HEADER: &str = "X-Data-Source";

/// Registers every route. Paths are declared without trailing slashes; the
/// server wraps `NormalizePath::trim()` so `/events/` reaches `/events`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .route("/health", web::get().to(crate::health_check))
        // Auth
        .service(web::resource("/users/login").route(web::post().to(auth::handlers::login)))
        .service(web::resource("/token/refresh").route(web::post().to(auth::handlers::refresh)))
        // Users
        .service(
            web::resource("/users")
                .route(web::get().to(users::list_users))
                .route(web::post().to(users::register)),
        )
        .service(
            web::resource("/users/{id}")
                .route(web::get().to(users::get_user))
                .route(web::put().to(users::update_user))
                .route(web::delete().to(users::delete_user)),
        )
        // Groups
        .service(
            web::resource("/groups")
                .route(web::get().to(groups::list_groups))
                .route(web::post().to(groups::create_group)),
        )
        .service(
            web::resource("/groups/{id}")
                .route(web::get().to(groups::get_group))
                .route(web::put().to(groups::update_group))
                .route(web::delete().to(groups::delete_group)),
        )
        .service(web::resource("/groups/{id}/members").route(web::post().to(groups::add_member)))
        .service(
            web::resource("/groups/{id}/members/{user_id}").route(web::delete().to(groups::remove_member)),
        )
        // Events
        .service(
            web::resource("/events")
                .route(web::get().to(events::list_events))
                .route(web::post().to(events::create_event)),
        )
        .service(web::resource("/events/poster").route(web::post().to(events::upload_poster)))
        .service(web::resource("/events/reminders/send").route(web::post().to(events::send_reminders)))
        .service(
            web::resource("/events/{id}")
                .route(web::get().to(events::get_event))
                .route(web::put().to(events::update_event))
                .route(web::delete().to(events::delete_event)),
        )
        .service(web::resource("/events/{id}/poster").route(web::get().to(events::get_poster)))
        // Tickets
        .service(
            web::resource("/tickets")
                .route(web::get().to(tickets::list_tickets))
                .route(web::post().to(tickets::create_ticket)),
        )
        .service(
            web::resource("/tickets/{id}")
                .route(web::get().to(tickets::get_ticket))
                .route(web::put().to(tickets::update_ticket))
                .route(web::delete().to(tickets::delete_ticket)),
        )
        // Registrations
        .service(
            web::resource("/registrations")
                .route(web::get().to(registrations::list_registrations))
                .route(web::post().to(registrations::create_registration)),
        )
        .service(
            web::resource("/registrations/{id}")
                .route(web::get().to(registrations::get_registration))
                .route(web::put().to(registrations::update_registration))
                .route(web::delete().to(registrations::delete_registration)),
        )
        // Payments
        .service(
            web::resource("/payments")
                .route(web::get().to(payments::list_payments))
                .route(web::post().to(payments::create_payment)),
        )
        .service(
            web::resource("/payments/{id}")
                .route(web::get().to(payments::get_payment))
                .route(web::put().to(payments::update_payment))
                .route(web::delete().to(payments::delete_payment)),
        );
}

/// Fallback for unmatched routes, rendered in the usual error envelope.
pub async fn route_not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::not_found("Not found."))
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        AppError::non_field(format!("JSON parse error - {}", err)).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        AppError::non_field(format!("Invalid query string - {}", err)).into()
    })
}

/// Malformed ids in the path are treated as missing resources.
pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|_err, _req| AppError::not_found("Not found.").into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Cache,
    Database,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cache => "cache",
            DataSource::Database => "database",
        }
    }
}

pub(crate) fn json_with_source(status: StatusCode, body: &Value, source: DataSource) -> HttpResponse {
    HttpResponse::build(status)
        .insert_header((DATA_SOURCE_HEADER, source.as_str()))
        .json(body)
}

/// Serves `key` from the cache, or awaits `load` and caches the rendered body.
/// `load` is only polled on a miss.
pub(crate) async fn cached<Fut>(state: &AppState, key: &str, load: Fut) -> Result<HttpResponse, AppError>
where
    Fut: Future<Output = Result<Value, AppError>>,
{
    if let Some(body) = state.cache.get(key).await {
        return Ok(json_with_source(StatusCode::OK, &body, DataSource::Cache));
    }

    let body = load.await?;
    state.cache.set(key, &body).await;
    Ok(json_with_source(StatusCode::OK, &body, DataSource::Database))
}

/// Adds "required" for a missing value and "blank" for an empty one.
pub(crate) fn require_text(errors: &mut FieldErrors, field: &str, value: Option<&str>) {
    match value {
        None => errors.add(field, REQUIRED),
        Some(v) if v.trim().is_empty() => errors.add(field, BLANK),
        Some(_) => {}
    }
}

pub(crate) fn max_length(errors: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) {
    if let Some(value) = value {
        if value.chars().count() > max {
            errors.add(field, format!("Ensure this field has no more than {} characters.", max));
        }
    }
}

pub(crate) fn require<'a, T>(errors: &mut FieldErrors, field: &str, value: &'a Option<T>) -> Option<&'a T> {
    if value.is_none() {
        errors.add(field, REQUIRED);
    }
    value.as_ref()
}

pub(crate) fn non_negative(errors: &mut FieldErrors, field: &str, value: Option<i64>) {
    if matches!(value, Some(v) if v < 0) {
        errors.add(field, NOT_NEGATIVE);
    }
}

/// Fits a `NUMERIC(10, 2)` column and is not negative.
pub(crate) fn money(errors: &mut FieldErrors, field: &str, value: Option<Decimal>) {
    let Some(value) = value else {
        return;
    };
    if value.is_sign_negative() && !value.is_zero() {
        errors.add(field, NOT_NEGATIVE);
    }
    if value.normalize().scale() > 2 {
        errors.add(field, "Ensure that there are no more than 2 decimal places.");
    }
    if value.trunc().abs() >= Decimal::from(100_000_000i64) {
        errors.add(field, "Ensure that there are no more than 10 digits in total.");
    }
}

pub(crate) fn ordered(
    errors: &mut FieldErrors,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    field: &str,
    message: &str,
) {
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            errors.add(field, message);
        }
    }
}

/// Choice fields arrive as strings so a bad value names its field.
pub(crate) fn parse_choice<T: serde::de::DeserializeOwned>(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<&str>,
) -> Option<T> {
    let value = value?;
    match serde_json::from_value(Value::String(value.to_string())) {
        Ok(choice) => Some(choice),
        Err(_) => {
            errors.add(field, format!("\"{}\" is not a valid choice.", value));
            None
        }
    }
}

pub(crate) fn text_or_empty(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

pub const EVENTS_PER_PAGE: i64 = 10;

/// Page metadata returned with paginated lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub pages: i64,
    pub per_page: i64,
    pub total: i64,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_page: Option<i64>,
    pub previous_page: Option<i64>,
}

impl Pagination {
    /// The `page` query value; anything that is not an integer means page 1.
    pub fn requested_page(raw: Option<&str>) -> i64 {
        raw.and_then(|page| page.trim().parse::<i64>().ok()).unwrap_or(1)
    }

    /// Out-of-range pages (below 1 or past the end) resolve to the last page.
    pub fn resolve(requested: i64, total: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        let total = total.max(0);
        let pages = ((total + per_page - 1) / per_page).max(1);
        let page = if requested < 1 || requested > pages { pages } else { requested };

        let has_next = page < pages;
        let has_previous = page > 1;
        Self {
            page,
            pages,
            per_page,
            total,
            has_next,
            has_previous,
            next_page: has_next.then_some(page + 1),
            previous_page: has_previous.then_some(page - 1),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PaymentMethod;
    use std::str::FromStr;

    #[test]
    fn test_requested_page() {
        assert_eq!(Pagination::requested_page(None), 1);
        assert_eq!(Pagination::requested_page(Some("3")), 3);
        assert_eq!(Pagination::requested_page(Some("abc")), 1);
        assert_eq!(Pagination::requested_page(Some("")), 1);
        assert_eq!(Pagination::requested_page(Some("-2")), -2);
    }

    #[test]
    fn test_pagination_middle_page() {
        let page = Pagination::resolve(2, 25, 10);
        assert_eq!(page.page, 2);
        assert_eq!(page.pages, 3);
        assert_eq!(page.offset(), 10);
        assert!(page.has_next && page.has_previous);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));
    }

    #[test]
    fn test_pagination_clamps_out_of_range() {
        let past_end = Pagination::resolve(99, 25, 10);
        assert_eq!(past_end.page, 3);
        assert!(!past_end.has_next);
        assert_eq!(past_end.next_page, None);

        let below_one = Pagination::resolve(0, 25, 10);
        assert_eq!(below_one.page, 3);
    }

    #[test]
    fn test_pagination_empty_list_has_one_page() {
        let page = Pagination::resolve(1, 0, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.pages, 1);
        assert_eq!(page.total, 0);
        assert!(!page.has_next && !page.has_previous);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn test_require_text() {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "name", None);
        require_text(&mut errors, "location", Some("   "));
        require_text(&mut errors, "category", Some("Music"));
        assert_eq!(errors.get("name"), Some(&[REQUIRED.to_string()][..]));
        assert_eq!(errors.get("location"), Some(&[BLANK.to_string()][..]));
        assert!(errors.get("category").is_none());
    }

    #[test]
    fn test_money_validation() {
        let check = |raw: &str| {
            let mut errors = FieldErrors::new();
            money(&mut errors, "price", Some(Decimal::from_str(raw).unwrap()));
            errors
        };

        assert!(check("150000.00").is_empty());
        assert!(check("0").is_empty());
        assert!(check("12.50").is_empty());
        assert!(!check("-1").is_empty());
        assert!(!check("1.005").is_empty());
        assert!(!check("100000000").is_empty());
    }

    #[test]
    fn test_parse_choice() {
        let mut errors = FieldErrors::new();
        let method: Option<PaymentMethod> = parse_choice(&mut errors, "payment_method", Some("QRIS"));
        assert_eq!(method, Some(PaymentMethod::Qris));
        assert!(errors.is_empty());

        let method: Option<PaymentMethod> = parse_choice(&mut errors, "payment_method", Some("BITCOIN"));
        assert!(method.is_none());
        assert_eq!(
            errors.get("payment_method"),
            Some(&["\"BITCOIN\" is not a valid choice.".to_string()][..])
        );
    }

    #[test]
    fn test_data_source_header_values() {
        assert_eq!(DataSource::Cache.as_str(), "cache");
        assert_eq!(DataSource::Database.as_str(), "database");
    }
}

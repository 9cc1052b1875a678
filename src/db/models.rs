use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const ADMIN_GROUP: &str = "admin";
pub const ORGANIZER_GROUP: &str = "organizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Superuser,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, password_hash: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            email: None,
            first_name: None,
            last_name: None,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// "First Last", or the username when both names are blank.
pub fn display_name(first_name: Option<&str>, last_name: Option<&str>, username: &str) -> String {
    let full = format!(
        "{} {}",
        first_name.unwrap_or_default(),
        last_name.unwrap_or_default()
    );
    let full = full.trim();
    if full.is_empty() {
        username.to_string()
    } else {
        full.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: EventStatus,
    pub quota: i32,
    pub category: String,
    pub organizer_id: Uuid,
    pub poster: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Event joined with its organizer's username.
#[derive(Debug, Clone, FromRow)]
pub struct EventWithOrganizer {
    #[sqlx(flatten)]
    pub event: Event,
    pub organizer_username: String,
}

/// Column values shared by event create and update.
#[derive(Debug, Clone)]
pub struct EventFields {
    pub name: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: EventStatus,
    pub quota: i32,
    pub category: String,
    pub organizer_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub sales_start: DateTime<Utc>,
    pub sales_end: DateTime<Utc>,
    pub quota: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TicketWithEvent {
    #[sqlx(flatten)]
    pub ticket: Ticket,
    pub event_name: String,
}

#[derive(Debug, Clone)]
pub struct TicketFields {
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub sales_start: DateTime<Utc>,
    pub sales_end: DateTime<Utc>,
    pub quota: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub reminded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration with the names its representations need.
#[derive(Debug, Clone, FromRow)]
pub struct RegistrationDetails {
    #[sqlx(flatten)]
    pub registration: Registration,
    pub ticket_name: String,
    pub ticket_price: Decimal,
    pub username: String,
    pub event_id: Uuid,
    pub event_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Qris,
    BankTransfer,
    CreditCard,
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl PaymentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub amount_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentDetails {
    #[sqlx(flatten)]
    pub payment: Payment,
    pub username: String,
    pub ticket_name: String,
}

#[derive(Debug, Clone)]
pub struct PaymentFields {
    pub registration_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub amount_paid: Decimal,
}

/// One reminder email to send: a registration of a user for an upcoming event.
#[derive(Debug, Clone, FromRow)]
pub struct DueReminder {
    pub registration_id: Uuid,
    pub event_id: Uuid,
    pub email: Option<String>,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub event_name: String,
    pub start_time: DateTime<Utc>,
    pub location: String,
    pub status: EventStatus,
}

impl DueReminder {
    pub fn recipient_name(&self) -> String {
        display_name(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            &self.username,
        )
    }
}

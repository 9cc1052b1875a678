//! Database module for the DicoEvent server
//!
//! Connection pooling, migrations and the `DbOperations` data access layer.
//! Queries are grouped per table in the submodules below.

pub mod models;
pub mod operations;

mod events;
mod groups;
mod payments;
mod registrations;
mod reminders;
mod tickets;
mod users;

pub use models::{
    DueReminder, Event, EventFields, EventStatus, EventWithOrganizer, Group, Payment,
    PaymentDetails, PaymentFields, PaymentMethod, PaymentStatus, Registration,
    RegistrationDetails, Role, Ticket, TicketFields, TicketWithEvent, User,
};
pub use operations::{DbOperations, DbPoolStatus};
pub use registrations::RegistrationOutcome;
pub use users::UserChanges;

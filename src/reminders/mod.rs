//! Event reminder emails
//!
//! Registered users of a scheduled event get one email roughly
//! `reminders.lead_minutes` before it starts. A periodic scan covers events
//! entering the reminder window; a check right after registration covers
//! users who sign up when the event is already inside it. `reminded_at` on
//! the registration keeps both paths from sending twice.

mod queue;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{EmailConfig, ReminderConfig};
use crate::db::{DbOperations, DueReminder, EventStatus};
use crate::email::{EmailMessage, Mailer};
use crate::error::AppError;

pub use queue::{spawn_scheduler, QueuedJob, ReminderJob, ReminderQueue, ReminderWorker};

/// Start-time range an event must fall in to be reminded about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReminderWindow {
    pub fn around(now: DateTime<Utc>, lead: Duration, tolerance: Duration) -> Self {
        let target = now + lead;
        Self {
            start: target - tolerance,
            end: target + tolerance,
        }
    }

    /// Inclusive at both ends.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Whether a fresh registration should be reminded right away.
pub fn is_due_now(status: EventStatus, start_time: DateTime<Utc>, now: DateTime<Utc>, lead: Duration) -> bool {
    status == EventStatus::Scheduled && start_time > now && start_time <= now + lead
}

/// "2 hours", "1 hour" or "45 minutes".
pub fn lead_phrase(lead_minutes: i64) -> String {
    if lead_minutes >= 60 && lead_minutes % 60 == 0 {
        let hours = lead_minutes / 60;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{} hours", hours)
        }
    } else if lead_minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{} minutes", lead_minutes)
    }
}

/// The reminder email for one registration; `None` when the user has no address.
pub fn reminder_message(reminder: &DueReminder, lead_minutes: i64, team_name: &str) -> Option<EmailMessage> {
    let to = reminder.email.as_deref().map(str::trim).filter(|e| !e.is_empty())?;

    let body = format!(
        "Hi {name},\n\
         \n\
         This is a reminder that you have registered for the following event:\n\
         \n\
         Event: {event}\n\
         Date & Time: {start}\n\
         Location: {location}\n\
         \n\
         The event will start in approximately {lead}. Please make sure to arrive on time.\n\
         \n\
         Best regards,\n\
         {team}\n",
        name = reminder.recipient_name(),
        event = reminder.event_name,
        start = reminder.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
        location = reminder.location,
        lead = lead_phrase(lead_minutes),
        team = team_name,
    );

    Some(EmailMessage {
        to: to.to_string(),
        subject: format!("Event Reminder: {}", reminder.event_name),
        body,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
    Failed,
}

/// Outcome of one scan. `events` counts every scheduled event in the window,
/// including those whose registrations were all reminded earlier.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub events: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReminderReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.sent += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Failed => self.failed += 1,
        }
    }
}

pub struct ReminderService {
    db: DbOperations,
    mailer: Arc<dyn Mailer>,
    lead_minutes: i64,
    window_minutes: i64,
    team_name: String,
}

impl ReminderService {
    pub fn new(
        db: DbOperations,
        mailer: Arc<dyn Mailer>,
        reminders: &ReminderConfig,
        email: &EmailConfig,
    ) -> Self {
        Self {
            db,
            mailer,
            lead_minutes: reminders.lead_minutes,
            window_minutes: reminders.window_minutes,
            team_name: email.team_name.clone(),
        }
    }

    fn lead(&self) -> Duration {
        Duration::minutes(self.lead_minutes)
    }

    pub fn window(&self, now: DateTime<Utc>) -> ReminderWindow {
        ReminderWindow::around(now, self.lead(), Duration::minutes(self.window_minutes))
    }

    /// Emails every unreminded registration of scheduled events in the window.
    pub async fn send_due_reminders(&self, now: DateTime<Utc>) -> Result<ReminderReport, AppError> {
        let window = self.window(now);
        let events = self.db.count_scheduled_events(window.start, window.end).await?;
        let due = self.db.due_reminders(window.start, window.end).await?;

        let mut report = ReminderReport {
            events: usize::try_from(events).unwrap_or_default(),
            ..ReminderReport::default()
        };

        for reminder in &due {
            let delivery = self.deliver(reminder, now).await;
            report.record(delivery);
        }

        info!(
            "Reminder scan {} - {}: {} events, {} sent, {} skipped, {} failed",
            window.start, window.end, report.events, report.sent, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Immediate check after a registration is created.
    pub async fn remind_registration(&self, registration_id: Uuid, now: DateTime<Utc>) -> Result<Delivery, AppError> {
        let Some(reminder) = self.db.pending_reminder(registration_id).await? else {
            return Ok(Delivery::Skipped);
        };

        if !is_due_now(reminder.status, reminder.start_time, now, self.lead()) {
            return Ok(Delivery::Skipped);
        }

        Ok(self.deliver(&reminder, now).await)
    }

    async fn deliver(&self, reminder: &DueReminder, now: DateTime<Utc>) -> Delivery {
        let delivery = self.notify(reminder).await;
        if delivery == Delivery::Sent {
            if let Err(e) = self.db.mark_reminded(reminder.registration_id, now).await {
                error!(
                    "Reminder sent but registration {} could not be marked: {}",
                    reminder.registration_id, e
                );
            }
        }
        delivery
    }

    async fn notify(&self, reminder: &DueReminder) -> Delivery {
        let Some(message) = reminder_message(reminder, self.lead_minutes, &self.team_name) else {
            warn!(
                "No email address for {}, skipping reminder for {}",
                reminder.username, reminder.event_name
            );
            return Delivery::Skipped;
        };

        let recipient = message.to.clone();
        match self.mailer.send(message).await {
            Ok(()) => {
                info!("Reminder email sent to {} for event {}", recipient, reminder.event_name);
                Delivery::Sent
            }
            Err(e) => {
                error!("Failed to send reminder email to {}: {}", recipient, e);
                Delivery::Failed
            }
        }
    }
}

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{DueReminder, EventStatus};
use crate::db::operations::DbOperations;
use crate::error::AppError;

const REMINDER_SELECT: &str = r#"
    SELECT r.id AS registration_id, e.id AS event_id, u.email, u.username, u.first_name, u.last_name,
           e.name AS event_name, e.start_time, e.location, e.status
    FROM registrations r
    JOIN tickets t ON t.id = r.ticket_id
    JOIN events e ON e.id = t.event_id
    JOIN users u ON u.id = r.user_id
"#;

impl DbOperations {
    /// Scheduled events starting inside `[window_start, window_end]`, with or
    /// without registrations left to remind.
    pub async fn count_scheduled_events(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM events WHERE status = $1 AND start_time >= $2 AND start_time <= $3",
        )
        .bind(EventStatus::Scheduled)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Unreminded registrations of scheduled events starting inside
    /// `[window_start, window_end]`.
    pub async fn due_reminders(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<DueReminder>, AppError> {
        let reminders = sqlx::query_as::<_, DueReminder>(&format!(
            r#"
            {REMINDER_SELECT}
            WHERE e.status = $1
              AND e.start_time >= $2
              AND e.start_time <= $3
              AND r.reminded_at IS NULL
            ORDER BY e.start_time, r.created_at
            "#
        ))
        .bind(EventStatus::Scheduled)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(self.pool())
        .await?;

        Ok(reminders)
    }

    /// Reminder data for one registration, provided it has not been reminded yet.
    pub async fn pending_reminder(&self, registration_id: Uuid) -> Result<Option<DueReminder>, AppError> {
        let reminder = sqlx::query_as::<_, DueReminder>(&format!(
            r#"
            {REMINDER_SELECT}
            WHERE r.id = $1 AND r.reminded_at IS NULL
            "#
        ))
        .bind(registration_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(reminder)
    }
}

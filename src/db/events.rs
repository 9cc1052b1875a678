use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{Event, EventFields, EventWithOrganizer};
use crate::db::operations::DbOperations;
use crate::error::AppError;

const EVENT_COLUMNS: &str = "e.id, e.name, e.description, e.location, e.start_time, e.end_time, e.status, e.quota, e.category, e.organizer_id, e.poster, e.created_at, e.updated_at";

impl DbOperations {
    pub async fn create_event(&self, fields: &EventFields) -> Result<Event, AppError> {
        let now = Utc::now();
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events AS e (id, name, description, location, start_time, end_time, status, quota, category, organizer_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.location)
        .bind(fields.start_time)
        .bind(fields.end_time)
        .bind(fields.status)
        .bind(fields.quota)
        .bind(&fields.category)
        .bind(fields.organizer_id)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(event)
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<EventWithOrganizer>, AppError> {
        let event = sqlx::query_as::<_, EventWithOrganizer>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}, u.username AS organizer_username
            FROM events e JOIN users u ON u.id = e.organizer_id
            WHERE e.id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(event)
    }

    pub async fn event_exists(&self, id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        Ok(exists)
    }

    pub async fn count_events(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    /// Newest first.
    pub async fn list_events(&self, limit: i64, offset: i64) -> Result<Vec<EventWithOrganizer>, AppError> {
        let events = sqlx::query_as::<_, EventWithOrganizer>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}, u.username AS organizer_username
            FROM events e JOIN users u ON u.id = e.organizer_id
            ORDER BY e.created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(events)
    }

    pub async fn update_event(&self, id: Uuid, fields: &EventFields) -> Result<Event, AppError> {
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events AS e
            SET name = $2,
                description = $3,
                location = $4,
                start_time = $5,
                end_time = $6,
                status = $7,
                quota = $8,
                category = $9,
                organizer_id = $10,
                updated_at = $11
            WHERE e.id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(&fields.location)
        .bind(fields.start_time)
        .bind(fields.end_time)
        .bind(fields.status)
        .bind(fields.quota)
        .bind(&fields.category)
        .bind(fields.organizer_id)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        Ok(event)
    }

    pub async fn set_event_poster(&self, id: Uuid, poster: Option<&str>) -> Result<Event, AppError> {
        let event = sqlx::query_as::<_, Event>(&format!(
            r#"
            UPDATE events AS e SET poster = $2, updated_at = $3
            WHERE e.id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(poster)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        Ok(event)
    }

    pub async fn delete_event(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

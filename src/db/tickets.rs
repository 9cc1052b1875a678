use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{Ticket, TicketFields, TicketWithEvent};
use crate::db::operations::DbOperations;
use crate::error::AppError;

const TICKET_COLUMNS: &str = "t.id, t.event_id, t.name, t.price, t.sales_start, t.sales_end, t.quota, t.created_at, t.updated_at";

impl DbOperations {
    pub async fn create_ticket(&self, fields: &TicketFields) -> Result<Ticket, AppError> {
        let now = Utc::now();
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            r#"
            INSERT INTO tickets AS t (id, event_id, name, price, sales_start, sales_end, quota, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(fields.event_id)
        .bind(&fields.name)
        .bind(fields.price)
        .bind(fields.sales_start)
        .bind(fields.sales_end)
        .bind(fields.quota)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(ticket)
    }

    pub async fn get_ticket(&self, id: Uuid) -> Result<Option<TicketWithEvent>, AppError> {
        let ticket = sqlx::query_as::<_, TicketWithEvent>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}, e.name AS event_name
            FROM tickets t JOIN events e ON e.id = t.event_id
            WHERE t.id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(ticket)
    }

    pub async fn ticket_exists(&self, id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tickets WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        Ok(exists)
    }

    pub async fn list_tickets(&self) -> Result<Vec<TicketWithEvent>, AppError> {
        let tickets = sqlx::query_as::<_, TicketWithEvent>(&format!(
            r#"
            SELECT {TICKET_COLUMNS}, e.name AS event_name
            FROM tickets t JOIN events e ON e.id = t.event_id
            ORDER BY t.created_at DESC
            "#
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(tickets)
    }

    pub async fn update_ticket(&self, id: Uuid, fields: &TicketFields) -> Result<Ticket, AppError> {
        let ticket = sqlx::query_as::<_, Ticket>(&format!(
            r#"
            UPDATE tickets AS t
            SET event_id = $2,
                name = $3,
                price = $4,
                sales_start = $5,
                sales_end = $6,
                quota = $7,
                updated_at = $8
            WHERE t.id = $1
            RETURNING {TICKET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(fields.event_id)
        .bind(&fields.name)
        .bind(fields.price)
        .bind(fields.sales_start)
        .bind(fields.sales_end)
        .bind(fields.quota)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        Ok(ticket)
    }

    pub async fn delete_ticket(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

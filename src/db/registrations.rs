use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{Registration, RegistrationDetails};
use crate::db::operations::DbOperations;
use crate::error::AppError;

const REGISTRATION_COLUMNS: &str = "r.id, r.ticket_id, r.user_id, r.reminded_at, r.created_at, r.updated_at";

const DETAILS_FROM: &str = r#"
    FROM registrations r
    JOIN tickets t ON t.id = r.ticket_id
    JOIN events e ON e.id = t.event_id
    JOIN users u ON u.id = r.user_id
"#;

/// Result of placing a user on a ticket.
#[derive(Debug)]
pub enum RegistrationOutcome {
    Saved(Registration),
    AlreadyRegistered,
    QuotaReached,
    TicketMissing,
}

impl DbOperations {
    /// Inserts a registration, enforcing the unique pair and the ticket quota
    /// under a row lock on the ticket.
    pub async fn create_registration(&self, ticket_id: Uuid, user_id: Uuid) -> Result<RegistrationOutcome, AppError> {
        let mut transaction = self.begin_transaction().await?;

        let result = Self::place_registration(&mut transaction, None, ticket_id, user_id).await;
        Self::finish(transaction, result).await
    }

    /// Moves an existing registration to a (possibly different) ticket/user.
    pub async fn update_registration(
        &self,
        id: Uuid,
        ticket_id: Uuid,
        user_id: Uuid,
    ) -> Result<RegistrationOutcome, AppError> {
        let mut transaction = self.begin_transaction().await?;

        let result = Self::place_registration(&mut transaction, Some(id), ticket_id, user_id).await;
        Self::finish(transaction, result).await
    }

    async fn finish(
        transaction: Transaction<'_, Postgres>,
        result: Result<RegistrationOutcome, AppError>,
    ) -> Result<RegistrationOutcome, AppError> {
        match result {
            Ok(RegistrationOutcome::Saved(registration)) => {
                transaction.commit().await?;
                Ok(RegistrationOutcome::Saved(registration))
            }
            Ok(rejected) => {
                transaction.rollback().await?;
                Ok(rejected)
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn place_registration(
        transaction: &mut Transaction<'_, Postgres>,
        existing: Option<Uuid>,
        ticket_id: Uuid,
        user_id: Uuid,
    ) -> Result<RegistrationOutcome, AppError> {
        let quota: Option<i32> = sqlx::query_scalar("SELECT quota FROM tickets WHERE id = $1 FOR UPDATE")
            .bind(ticket_id)
            .fetch_optional(&mut **transaction)
            .await?;
        let Some(quota) = quota else {
            return Ok(RegistrationOutcome::TicketMissing);
        };

        let duplicate: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM registrations
                WHERE ticket_id = $1 AND user_id = $2 AND ($3::uuid IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(ticket_id)
        .bind(user_id)
        .bind(existing)
        .fetch_one(&mut **transaction)
        .await?;
        if duplicate {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations WHERE ticket_id = $1 AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(ticket_id)
        .bind(existing)
        .fetch_one(&mut **transaction)
        .await?;
        if taken >= i64::from(quota) {
            return Ok(RegistrationOutcome::QuotaReached);
        }

        let now = Utc::now();
        let registration = match existing {
            None => {
                sqlx::query_as::<_, Registration>(&format!(
                    r#"
                    INSERT INTO registrations AS r (id, ticket_id, user_id, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $4)
                    RETURNING {REGISTRATION_COLUMNS}
                    "#
                ))
                .bind(Uuid::new_v4())
                .bind(ticket_id)
                .bind(user_id)
                .bind(now)
                .fetch_one(&mut **transaction)
                .await?
            }
            Some(id) => {
                sqlx::query_as::<_, Registration>(&format!(
                    r#"
                    UPDATE registrations AS r
                    SET ticket_id = $2, user_id = $3, updated_at = $4
                    WHERE r.id = $1
                    RETURNING {REGISTRATION_COLUMNS}
                    "#
                ))
                .bind(id)
                .bind(ticket_id)
                .bind(user_id)
                .bind(now)
                .fetch_one(&mut **transaction)
                .await?
            }
        };

        Ok(RegistrationOutcome::Saved(registration))
    }

    pub async fn get_registration(&self, id: Uuid) -> Result<Option<RegistrationDetails>, AppError> {
        let registration = sqlx::query_as::<_, RegistrationDetails>(&format!(
            r#"
            SELECT {REGISTRATION_COLUMNS}, t.name AS ticket_name, t.price AS ticket_price,
                   u.username, e.id AS event_id, e.name AS event_name
            {DETAILS_FROM}
            WHERE r.id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(registration)
    }

    pub async fn registration_exists(&self, id: Uuid) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM registrations WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;

        Ok(exists)
    }

    pub async fn list_registrations(&self) -> Result<Vec<RegistrationDetails>, AppError> {
        let registrations = sqlx::query_as::<_, RegistrationDetails>(&format!(
            r#"
            SELECT {REGISTRATION_COLUMNS}, t.name AS ticket_name, t.price AS ticket_price,
                   u.username, e.id AS event_id, e.name AS event_name
            {DETAILS_FROM}
            ORDER BY r.created_at DESC
            "#
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(registrations)
    }

    pub async fn delete_registration(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_reminded(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE registrations SET reminded_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await?;

        Ok(())
    }
}

use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{Payment, PaymentDetails, PaymentFields};
use crate::db::operations::DbOperations;
use crate::error::AppError;

const PAYMENT_COLUMNS: &str = "p.id, p.registration_id, p.payment_method, p.payment_status, p.amount_paid, p.created_at, p.updated_at";

impl DbOperations {
    pub async fn create_payment(&self, fields: &PaymentFields) -> Result<Payment, AppError> {
        let now = Utc::now();
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments AS p (id, registration_id, payment_method, payment_status, amount_paid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(fields.registration_id)
        .bind(fields.payment_method)
        .bind(fields.payment_status)
        .bind(fields.amount_paid)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(payment)
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(payment)
    }

    pub async fn list_payments(&self) -> Result<Vec<PaymentDetails>, AppError> {
        let payments = sqlx::query_as::<_, PaymentDetails>(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}, u.username, t.name AS ticket_name
            FROM payments p
            JOIN registrations r ON r.id = p.registration_id
            JOIN users u ON u.id = r.user_id
            JOIN tickets t ON t.id = r.ticket_id
            ORDER BY p.created_at DESC
            "#
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(payments)
    }

    pub async fn update_payment(&self, id: Uuid, fields: &PaymentFields) -> Result<Payment, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments AS p
            SET registration_id = $2,
                payment_method = $3,
                payment_status = $4,
                amount_paid = $5,
                updated_at = $6
            WHERE p.id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(fields.registration_id)
        .bind(fields.payment_method)
        .bind(fields.payment_status)
        .bind(fields.amount_paid)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;

        Ok(payment)
    }

    pub async fn delete_payment(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

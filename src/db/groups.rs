use uuid::Uuid;

use crate::db::models::Group;
use crate::db::operations::DbOperations;
use crate::error::AppError;

impl DbOperations {
    pub async fn create_group(&self, name: &str) -> Result<Group, AppError> {
        let group = sqlx::query_as::<_, Group>(
            "INSERT INTO groups (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(self.pool())
        .await?;

        Ok(group)
    }

    pub async fn get_group(&self, id: i32) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>("SELECT id, name FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(group)
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, AppError> {
        let groups = sqlx::query_as::<_, Group>("SELECT id, name FROM groups ORDER BY id")
            .fetch_all(self.pool())
            .await?;

        Ok(groups)
    }

    pub async fn group_name_taken(&self, name: &str, exclude: Option<i32>) -> Result<bool, AppError> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE name = $1 AND ($2::int IS NULL OR id <> $2))",
        )
        .bind(name)
        .bind(exclude)
        .fetch_one(self.pool())
        .await?;

        Ok(taken)
    }

    pub async fn rename_group(&self, id: i32, name: &str) -> Result<Group, AppError> {
        let group = sqlx::query_as::<_, Group>(
            "UPDATE groups SET name = $2 WHERE id = $1 RETURNING id, name",
        )
        .bind(id)
        .bind(name)
        .fetch_one(self.pool())
        .await?;

        Ok(group)
    }

    pub async fn delete_group(&self, id: i32) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Idempotent: adding an existing member is not an error.
    pub async fn add_group_member(&self, group_id: i32, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn remove_group_member(&self, group_id: i32, user_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM user_groups WHERE user_id = $1 AND group_id = $2")
            .bind(user_id)
            .bind(group_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

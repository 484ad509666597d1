//! Postponement store operations.

use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::PostponedNotification;

/// Postponed notification operations against the pool.
pub struct PostponedOps;

impl PostponedOps {
    /// Store a postponed notification.
    ///
    /// Returns `false` when a row with the same key is already waiting.
    pub async fn insert(pool: &SqlitePool, row: &PostponedNotification) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO postponed_notifications (
                postponed_at, language, user_id, uniqueness,
                notification_type, notification_channel, notification_channel_value, payload
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(row.postponed_at)
        .bind(&row.language)
        .bind(&row.key.user_id)
        .bind(&row.key.uniqueness)
        .bind(&row.key.notification_type)
        .bind(&row.key.notification_channel)
        .bind(&row.key.notification_channel_value)
        .bind(&row.payload)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically remove and return every postponed row of a user.
    pub async fn drain_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<PostponedNotification>> {
        let rows = sqlx::query_as::<_, PostponedNotification>(
            "DELETE FROM postponed_notifications WHERE user_id = ? RETURNING *",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<PostponedNotification>> {
        let rows = sqlx::query_as::<_, PostponedNotification>(
            r#"
            SELECT * FROM postponed_notifications
            WHERE user_id = ?
            ORDER BY postponed_at, uniqueness, notification_channel_value
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Delete rows postponed before `cutoff_ms`.
    pub async fn prune_before(pool: &SqlitePool, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM postponed_notifications WHERE postponed_at < ?")
            .bind(cutoff_ms)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

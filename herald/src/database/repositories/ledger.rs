//! Delivery ledger operations.
//!
//! Inserting a row is the proof of intent to send. A unique-key violation
//! surfaces as [`crate::Error::Duplicate`], meaning someone already sent it.

use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{
    SentAnnouncement, SentAnnouncementKey, SentNotification, SentNotificationKey,
};

/// Ledger operations against the pool.
pub struct LedgerOps;

impl LedgerOps {
    pub async fn insert_notification(pool: &SqlitePool, row: &SentNotification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sent_notifications (
                sent_at, language, user_id, uniqueness,
                notification_type, notification_channel, notification_channel_value
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.sent_at)
        .bind(&row.language)
        .bind(&row.key.user_id)
        .bind(&row.key.uniqueness)
        .bind(&row.key.notification_type)
        .bind(&row.key.notification_channel)
        .bind(&row.key.notification_channel_value)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Compensating delete after a failed send.
    pub async fn delete_notification(pool: &SqlitePool, key: &SentNotificationKey) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sent_notifications
            WHERE user_id = ?
              AND uniqueness = ?
              AND notification_type = ?
              AND notification_channel = ?
              AND notification_channel_value = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.uniqueness)
        .bind(&key.notification_type)
        .bind(&key.notification_channel)
        .bind(&key.notification_channel_value)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_announcement(pool: &SqlitePool, row: &SentAnnouncement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sent_announcements (
                sent_at, language, uniqueness,
                notification_type, notification_channel, notification_channel_value
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.sent_at)
        .bind(&row.language)
        .bind(&row.key.uniqueness)
        .bind(&row.key.notification_type)
        .bind(&row.key.notification_channel)
        .bind(&row.key.notification_channel_value)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Compensating delete after a failed broadcast.
    pub async fn delete_announcement(pool: &SqlitePool, key: &SentAnnouncementKey) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sent_announcements
            WHERE uniqueness = ?
              AND notification_type = ?
              AND notification_channel = ?
              AND notification_channel_value = ?
            "#,
        )
        .bind(&key.uniqueness)
        .bind(&key.notification_type)
        .bind(&key.notification_channel)
        .bind(&key.notification_channel_value)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_notification(
        pool: &SqlitePool,
        key: &SentNotificationKey,
    ) -> Result<Option<SentNotification>> {
        let row = sqlx::query_as::<_, SentNotification>(
            r#"
            SELECT * FROM sent_notifications
            WHERE user_id = ?
              AND uniqueness = ?
              AND notification_type = ?
              AND notification_channel = ?
              AND notification_channel_value = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.uniqueness)
        .bind(&key.notification_type)
        .bind(&key.notification_channel)
        .bind(&key.notification_channel_value)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list_notifications_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<SentNotification>> {
        let rows = sqlx::query_as::<_, SentNotification>(
            r#"
            SELECT * FROM sent_notifications
            WHERE user_id = ?
            ORDER BY notification_type, notification_channel, notification_channel_value
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_announcements(
        pool: &SqlitePool,
        uniqueness: &str,
    ) -> Result<Vec<SentAnnouncement>> {
        let rows = sqlx::query_as::<_, SentAnnouncement>(
            r#"
            SELECT * FROM sent_announcements
            WHERE uniqueness = ?
            ORDER BY notification_type, notification_channel, notification_channel_value
            "#,
        )
        .bind(uniqueness)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Delete personal ledger rows sent before `cutoff_ms`.
    pub async fn prune_notifications_before(pool: &SqlitePool, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sent_notifications WHERE sent_at < ?")
            .bind(cutoff_ms)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete broadcast ledger rows sent before `cutoff_ms`.
    pub async fn prune_announcements_before(pool: &SqlitePool, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sent_announcements WHERE sent_at < ?")
            .bind(cutoff_ms)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

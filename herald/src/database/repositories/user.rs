//! User directory repository.
//!
//! Covers the user projection, device registrations and contact lists.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{ContactsDbModel, UserDbModel};
use crate::notification::types::NotificationChannel;

/// User directory access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find a user by their unique ID.
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserDbModel>>;

    /// Insert or update the profile columns of a user.
    ///
    /// Preference columns and the ping cooldown are left untouched on update.
    async fn upsert_profile(&self, user: &UserDbModel) -> Result<()>;

    /// Delete a user and all of their device registrations.
    async fn delete(&self, user_id: &str) -> Result<()>;

    /// Users whose address book contains `phone_number_hash`.
    async fn find_by_agenda_phone_number_hash(
        &self,
        phone_number_hash: &str,
    ) -> Result<Vec<UserDbModel>>;

    /// Non-empty push tokens of a user, sorted.
    async fn push_tokens(&self, user_id: &str) -> Result<Vec<String>>;

    /// Whether the user has registered any device at all.
    async fn has_device_metadata(&self, user_id: &str) -> Result<bool>;

    /// Insert or update a device registration.
    ///
    /// Returns `false` when the stored token already matched.
    async fn upsert_device_token(
        &self,
        user_id: &str,
        device_unique_id: &str,
        token: Option<String>,
    ) -> Result<bool>;

    /// Forget a dead push token wherever the user registered it.
    async fn clear_push_token(&self, user_id: &str, token: &str) -> Result<u64>;

    /// Append a contact to a user's list. Returns `false` if already present.
    async fn add_contact(&self, user_id: &str, contact_user_id: &str) -> Result<bool>;

    async fn find_contacts(&self, user_id: &str) -> Result<Option<ContactsDbModel>>;

    /// Replace the disabled domains of `channel` if they still equal `expected`.
    ///
    /// Returns `false` when a concurrent writer changed the column first or the
    /// user no longer exists.
    async fn compare_and_set_disabled_domains(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        expected: Option<String>,
        new: String,
    ) -> Result<bool>;

    /// Replace the ping cooldown if it still equals `expected` and the user is
    /// still referred by `referred_by`.
    async fn compare_and_set_ping_cooldown(
        &self,
        user_id: &str,
        referred_by: Option<String>,
        expected: Option<i64>,
        new: Option<i64>,
    ) -> Result<bool>;
}

/// SQLx implementation of UserRepository.
pub struct SqlxUserRepository {
    pool: SqlitePool,
}

impl SqlxUserRepository {
    /// Create a new SqlxUserRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserDbModel>> {
        let user = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn upsert_profile(&self, user: &UserDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, username, first_name, last_name, email, phone_number,
                phone_number_hash, agenda_phone_number_hashes, profile_picture_name,
                referred_by, language, completed_registration_process
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                phone_number = excluded.phone_number,
                phone_number_hash = excluded.phone_number_hash,
                agenda_phone_number_hashes = excluded.agenda_phone_number_hashes,
                profile_picture_name = excluded.profile_picture_name,
                referred_by = excluded.referred_by,
                language = excluded.language,
                completed_registration_process = excluded.completed_registration_process
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.phone_number_hash)
        .bind(&user.agenda_phone_number_hashes)
        .bind(&user.profile_picture_name)
        .bind(&user.referred_by)
        .bind(&user.language)
        .bind(user.completed_registration_process)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM device_metadata WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_agenda_phone_number_hash(
        &self,
        phone_number_hash: &str,
    ) -> Result<Vec<UserDbModel>> {
        let candidates = sqlx::query_as::<_, UserDbModel>(
            r#"
            SELECT * FROM users
            WHERE agenda_phone_number_hashes IS NOT NULL
              AND instr(agenda_phone_number_hashes, ?) > 0
            ORDER BY user_id
            "#,
        )
        .bind(phone_number_hash)
        .fetch_all(&self.pool)
        .await?;

        // instr() also matches substrings of longer hashes.
        Ok(candidates
            .into_iter()
            .filter(|u| {
                u.agenda_phone_number_hashes
                    .as_deref()
                    .is_some_and(|hashes| hashes.split(',').any(|h| h == phone_number_hash))
            })
            .collect())
    }

    async fn push_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        let tokens: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT push_notification_token FROM device_metadata
            WHERE user_id = ?
              AND push_notification_token IS NOT NULL
              AND push_notification_token != ''
            ORDER BY push_notification_token
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens.into_iter().map(|(t,)| t).collect())
    }

    async fn has_device_metadata(&self, user_id: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM device_metadata WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn upsert_device_token(
        &self,
        user_id: &str,
        device_unique_id: &str,
        token: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_metadata (user_id, device_unique_id, push_notification_token)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, device_unique_id) DO UPDATE
                SET push_notification_token = excluded.push_notification_token
                WHERE device_metadata.push_notification_token IS NOT excluded.push_notification_token
            "#,
        )
        .bind(user_id)
        .bind(device_unique_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_push_token(&self, user_id: &str, token: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE device_metadata
            SET push_notification_token = NULL
            WHERE user_id = ?
              AND push_notification_token = ?
            "#,
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn add_contact(&self, user_id: &str, contact_user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO contacts (user_id, contact_user_ids) VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE
                SET contact_user_ids = contacts.contact_user_ids || ',' || excluded.contact_user_ids
                WHERE instr(',' || contacts.contact_user_ids || ',', ',' || excluded.contact_user_ids || ',') = 0
            "#,
        )
        .bind(user_id)
        .bind(contact_user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_contacts(&self, user_id: &str) -> Result<Option<ContactsDbModel>> {
        let contacts =
            sqlx::query_as::<_, ContactsDbModel>("SELECT * FROM contacts WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(contacts)
    }

    async fn compare_and_set_disabled_domains(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        expected: Option<String>,
        new: String,
    ) -> Result<bool> {
        let sql = match channel {
            NotificationChannel::Email => {
                r#"
                UPDATE users SET disabled_email_notification_domains = ?
                WHERE user_id = ? AND disabled_email_notification_domains IS ?
                "#
            }
            _ => {
                r#"
                UPDATE users SET disabled_push_notification_domains = ?
                WHERE user_id = ? AND disabled_push_notification_domains IS ?
                "#
            }
        };
        let result = sqlx::query(sql)
            .bind(new)
            .bind(user_id)
            .bind(expected)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn compare_and_set_ping_cooldown(
        &self,
        user_id: &str,
        referred_by: Option<String>,
        expected: Option<i64>,
        new: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users SET last_ping_cooldown_ended_at = ?
            WHERE user_id = ?
              AND referred_by IS ?
              AND last_ping_cooldown_ended_at IS ?
            "#,
        )
        .bind(new)
        .bind(user_id)
        .bind(referred_by)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

//! User pings.
//!
//! A user may ping their referrer or a direct referral once per cooldown
//! window. The cooldown end is claimed with compare-and-set before the ping
//! event is published and released again if publishing fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::analytics::EventPublisher;
use crate::database::repositories::UserRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::{Error, Result};

/// Topic carrying [`UserPing`] events.
pub const USER_PINGS_TOPIC: &str = "user-pings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPing {
    pub user_id: String,
    #[serde(default)]
    pub pinged_by: String,
    pub last_ping_cooldown_ended_at: DateTime<Utc>,
}

/// Cooldown window index of a ping. Pings in the same window share it.
pub fn ping_uniqueness(cooldown_ended_at: DateTime<Utc>, cooldown: Duration) -> String {
    let ended_at_nanos = i128::from(cooldown_ended_at.timestamp()) * 1_000_000_000
        + i128::from(cooldown_ended_at.timestamp_subsec_nanos());
    let cooldown_nanos = cooldown.as_nanos().max(1) as i128;
    ended_at_nanos.div_euclid(cooldown_nanos).to_string()
}

pub struct PingService {
    users: Arc<dyn UserRepository>,
    publisher: Arc<dyn EventPublisher>,
    cooldown: Duration,
}

impl PingService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        publisher: Arc<dyn EventPublisher>,
        cooldown: Duration,
    ) -> Self {
        Self {
            users,
            publisher,
            cooldown,
        }
    }

    /// Ping `user_id` on behalf of `requested_by`.
    ///
    /// Fails with `Duplicate` while the previous ping's cooldown is running
    /// and with `PingNotAllowed` outside the direct referral relationship.
    pub async fn ping_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        loop {
            super::ensure_active(cancel, "ping user")?;
            let user = self
                .users
                .find_by_id(user_id)
                .await?
                .ok_or_else(|| Error::not_found("user", user_id))?;

            if user.referred_by() != Some(requested_by) {
                let requester = self
                    .users
                    .find_by_id(requested_by)
                    .await?
                    .ok_or_else(|| Error::relation_not_found("user", requested_by))?;
                if requester.referred_by() != Some(user_id) {
                    return Err(Error::PingNotAllowed {
                        user_id: user_id.to_string(),
                        requested_by: requested_by.to_string(),
                    });
                }
            }

            let now = Utc::now();
            if user
                .get_last_ping_cooldown_ended_at()
                .is_some_and(|ended_at| ended_at > now)
            {
                return Err(Error::Duplicate(format!(
                    "user {user_id} was already pinged"
                )));
            }

            let cooldown = chrono::Duration::from_std(self.cooldown)
                .map_err(|e| Error::config(format!("invalid ping cooldown: {e}")))?;
            let ends_at = now + cooldown;
            let previous = user.last_ping_cooldown_ended_at;
            let referred_by = user.referred_by.clone();

            let claimed = retry_on_sqlite_busy("claim ping cooldown", || {
                self.users.compare_and_set_ping_cooldown(
                    user_id,
                    referred_by.clone(),
                    previous,
                    Some(datetime_to_ms(ends_at)),
                )
            })
            .await?;
            if !claimed {
                debug!(user_id, "Ping cooldown changed concurrently, retrying");
                continue;
            }

            let ping = UserPing {
                user_id: user_id.to_string(),
                pinged_by: requested_by.to_string(),
                last_ping_cooldown_ended_at: ends_at,
            };
            let Err(err) = self.publish(&ping).await else {
                return Ok(());
            };

            warn!(
                user_id,
                requested_by,
                error = %err,
                "Failed to publish ping, releasing cooldown"
            );
            let released = retry_on_sqlite_busy("release ping cooldown", || {
                self.users.compare_and_set_ping_cooldown(
                    user_id,
                    referred_by.clone(),
                    Some(datetime_to_ms(ends_at)),
                    previous,
                )
            })
            .await;
            match released {
                Ok(true) => return Err(err),
                Ok(false) => continue,
                Err(e) => return Err(err.with_followups([e])),
            }
        }
    }

    async fn publish(&self, ping: &UserPing) -> Result<()> {
        let value = serde_json::to_vec(ping)?;
        self.publisher
            .publish(USER_PINGS_TOPIC, &ping.user_id, value)
            .await
    }
}

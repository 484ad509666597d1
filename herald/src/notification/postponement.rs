//! Replay of postponed push notifications.
//!
//! Push notifications produced while a user is still onboarding are parked in
//! `postponed_notifications`. Once the user completes registration or
//! registers a device token, the rows are drained and re-dispatched. Rows that
//! still cannot be delivered go back with their original timestamp so the
//! retention sweep measures from the first attempt.

use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::providers::PushNotification;
use super::resolver::{PostponeCondition, RecipientResolver};
use super::senders::{ChannelSenders, PushRequest};
use super::types::{DeviceToken, NotificationType};
use crate::database::DbPool;
use crate::database::models::{PostponedNotification, SentNotification};
use crate::database::repositories::PostponedOps;
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

pub struct PostponementReplayer {
    pool: DbPool,
    resolver: Arc<RecipientResolver>,
    senders: Arc<ChannelSenders>,
}

impl PostponementReplayer {
    pub fn new(
        pool: DbPool,
        resolver: Arc<RecipientResolver>,
        senders: Arc<ChannelSenders>,
    ) -> Self {
        Self {
            pool,
            resolver,
            senders,
        }
    }

    /// Drain and re-dispatch every postponed notification of `user_id`.
    pub async fn replay_all_for_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
    ) -> Result<()> {
        super::ensure_active(cancel, "replay postponed notifications")?;
        let rows = PostponedOps::drain_for_user(&self.pool, user_id).await?;
        if rows.is_empty() {
            return Ok(());
        }
        info!(
            user_id,
            count = rows.len(),
            "Replaying postponed notifications"
        );

        let replays = rows
            .iter()
            .cloned()
            .map(|row| self.replay(cancel, row).boxed())
            .collect();
        match fanout::execute_concurrently(cancel, replays).await {
            Ok(()) => Ok(()),
            // The rows are already drained: put them all back.
            Err(e) if e.is_cancelled() => {
                let mut failures = Vec::new();
                for row in &rows {
                    if let Err(e) = PostponedOps::insert(&self.pool, row).await {
                        failures.push(e);
                    }
                }
                let err = Error::deadline("replay postponed notifications cancelled");
                Err(err.with_followups(failures))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replay(&self, cancel: &CancellationToken, row: PostponedNotification) -> Result<()> {
        let Ok(notification_type) = NotificationType::from_str(&row.key.notification_type) else {
            warn!(
                user_id = %row.key.user_id,
                notification_type = %row.key.notification_type,
                "Dropping postponed notification of unknown type"
            );
            return Ok(());
        };
        let Some(notification) = json::parse_or_none::<PushNotification<DeviceToken>>(
            &row.payload,
            JsonContext::PostponedPayload {
                user_id: &row.key.user_id,
                uniqueness: &row.key.uniqueness,
            },
            "Dropping postponed notification with invalid payload",
        ) else {
            return Ok(());
        };

        let tokens = match self
            .resolver
            .push_tokens_or_postpone(
                cancel,
                notification_type.domain(),
                &row.key.user_id,
                PostponeCondition::RegistrationIncomplete,
            )
            .await
        {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                debug!(
                    user_id = %row.key.user_id,
                    notification_type = %notification_type,
                    "Postponed notification no longer wanted"
                );
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                debug!(
                    user_id = %row.key.user_id,
                    "Dropping postponed notification of deleted user"
                );
                return Ok(());
            }
            Err(e) => return Err(self.postpone_again(&row, e).await),
        };

        if tokens.postpone {
            PostponedOps::insert(&self.pool, &row).await?;
            return Ok(());
        }

        let language = tokens.language.clone();
        let sent = fanout::run_concurrently(cancel, tokens.tokens, |token| {
            let mut notification = notification.clone();
            let key = row.key.clone().with_value(token.as_str());
            let record = SentNotification::new(key, &language);
            notification.target = token;
            self.senders.send_push(
                cancel,
                PushRequest {
                    notification,
                    record,
                    postpone: false,
                },
            )
        })
        .await;

        match sent {
            Ok(()) => Ok(()),
            Err(e) => Err(self.postpone_again(&row, e.into()).await),
        }
    }

    /// Put `row` back and return `err` with any failure doing so.
    async fn postpone_again(&self, row: &PostponedNotification, err: Error) -> Error {
        warn!(
            user_id = %row.key.user_id,
            uniqueness = %row.key.uniqueness,
            error = %err,
            "Replay failed, postponing again"
        );
        match PostponedOps::insert(&self.pool, row).await {
            Ok(_) => err,
            Err(e) => err.with_followups([e]),
        }
    }
}

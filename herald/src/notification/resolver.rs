//! Recipient resolution.
//!
//! Decides, per user and domain, which push tokens and email address are
//! eligible right now. Read-only.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::types::{DeviceToken, NotificationChannel, NotificationDomain};
use crate::database::models::UserDbModel;
use crate::database::repositories::UserRepository;
use crate::{Error, Result};

/// Push targets of one user for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotificationTokens {
    pub user_id: String,
    pub language: String,
    pub tokens: Vec<DeviceToken>,
    /// The caller must postpone instead of sending.
    pub postpone: bool,
}

/// Reason to hold push notifications back even when tokens exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostponeCondition {
    RegistrationIncomplete,
}

impl PostponeCondition {
    pub fn holds(self, user: &UserDbModel) -> bool {
        match self {
            Self::RegistrationIncomplete => !user.completed_registration_process,
        }
    }
}

/// Email target of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecipient {
    pub user_id: String,
    pub language: String,
    pub email: String,
    /// Username with its first letter capitalized.
    pub display_name: String,
}

pub struct RecipientResolver {
    users: Arc<dyn UserRepository>,
}

impl RecipientResolver {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Push tokens of `user_id` for `domain`.
    ///
    /// `Ok(None)` means push is not possible right now: the domain is muted
    /// or the user has no token. Fails with `NotFound` for unknown users.
    pub async fn push_tokens(
        &self,
        cancel: &CancellationToken,
        domain: NotificationDomain,
        user_id: &str,
    ) -> Result<Option<PushNotificationTokens>> {
        self.resolve(cancel, domain, user_id, None).await
    }

    /// Like [`push_tokens`](Self::push_tokens), but asks the caller to
    /// postpone while `condition` holds or no token is registered yet.
    ///
    /// A postponed result without tokens carries one empty token so the
    /// notification can still be stored.
    pub async fn push_tokens_or_postpone(
        &self,
        cancel: &CancellationToken,
        domain: NotificationDomain,
        user_id: &str,
        condition: PostponeCondition,
    ) -> Result<Option<PushNotificationTokens>> {
        self.resolve(cancel, domain, user_id, Some(condition)).await
    }

    /// Push tokens for a user that was already loaded.
    pub async fn push_tokens_for(
        &self,
        user: &UserDbModel,
        domain: NotificationDomain,
    ) -> Result<Option<PushNotificationTokens>> {
        self.tokens_for(user, domain, None).await
    }

    async fn resolve(
        &self,
        cancel: &CancellationToken,
        domain: NotificationDomain,
        user_id: &str,
        condition: Option<PostponeCondition>,
    ) -> Result<Option<PushNotificationTokens>> {
        super::ensure_active(cancel, "resolve push tokens")?;
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))?;
        self.tokens_for(&user, domain, condition).await
    }

    async fn tokens_for(
        &self,
        user: &UserDbModel,
        domain: NotificationDomain,
        condition: Option<PostponeCondition>,
    ) -> Result<Option<PushNotificationTokens>> {
        if user.is_domain_disabled(NotificationChannel::Push, domain) {
            return Ok(None);
        }
        let tokens: Vec<DeviceToken> = self
            .users
            .push_tokens(&user.user_id)
            .await?
            .into_iter()
            .map(DeviceToken)
            .collect();

        let postpone = condition.is_some_and(|c| c.holds(user) || tokens.is_empty());
        if tokens.is_empty() && !postpone {
            return Ok(None);
        }
        let tokens = if tokens.is_empty() {
            vec![DeviceToken(String::new())]
        } else {
            tokens
        };

        Ok(Some(PushNotificationTokens {
            user_id: user.user_id.clone(),
            language: user.language.clone(),
            tokens,
            postpone,
        }))
    }

    /// Email recipient of `user_id` for `domain`.
    ///
    /// `Ok(None)` when the user has no email or username, mutes the domain for
    /// email, or (with `only_if_push_disabled`) could still be reached by push.
    pub async fn email_recipient(
        &self,
        cancel: &CancellationToken,
        domain: NotificationDomain,
        user_id: &str,
        only_if_push_disabled: bool,
    ) -> Result<Option<EmailRecipient>> {
        super::ensure_active(cancel, "resolve email recipient")?;
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))?;

        if user.is_domain_disabled(NotificationChannel::Email, domain) {
            return Ok(None);
        }
        let (Some(email), Some(username)) = (
            user.email.as_deref().filter(|e| !e.is_empty()),
            user.username(),
        ) else {
            return Ok(None);
        };
        if only_if_push_disabled {
            let push_disabled = user.is_domain_disabled(NotificationChannel::Push, domain)
                || !self.users.has_device_metadata(user_id).await?;
            if !push_disabled {
                return Ok(None);
            }
        }

        Ok(Some(EmailRecipient {
            user_id: user.user_id.clone(),
            language: user.language.clone(),
            email: email.to_string(),
            display_name: capitalize(username),
        }))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

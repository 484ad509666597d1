//! Per-channel notification preferences.
//!
//! A user mutes domains per channel. The disabled set is stored as a JSON
//! array on the user row; the `all` marker silences the whole channel and is
//! shown to the user as the `disable_all` toggle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{NotificationChannel, NotificationChannelToggle, NotificationDomain};
use crate::database::repositories::UserRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

pub struct ToggleManager {
    users: Arc<dyn UserRepository>,
}

impl ToggleManager {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Current toggles of `user_id` for `channel`, in display order.
    ///
    /// Unknown users get the defaults: everything enabled except `disable_all`.
    pub async fn get_notification_channel_toggles(
        &self,
        cancel: &CancellationToken,
        channel: NotificationChannel,
        user_id: &str,
    ) -> Result<Vec<NotificationChannelToggle>> {
        super::ensure_active(cancel, "get notification channel toggles")?;
        let domains = toggleable(channel)?;
        let disabled = match self.users.find_by_id(user_id).await? {
            Some(user) => user.disabled_domains(channel),
            None => Vec::new(),
        };
        let is_disabled =
            |domain: NotificationDomain| disabled.iter().any(|d| d == domain.as_ref());

        Ok(domains
            .iter()
            .map(|&domain| NotificationChannelToggle {
                domain,
                enabled: match domain {
                    NotificationDomain::DisableAll => is_disabled(NotificationDomain::All),
                    _ => !is_disabled(domain),
                },
            })
            .collect())
    }

    /// Enable or disable `domain` on `channel` for `user_id`.
    ///
    /// The disabled set is replaced with compare-and-set and re-read on every
    /// lost race, so concurrent toggles of the same user never drop each other.
    pub async fn toggle_notification_channel_domain(
        &self,
        cancel: &CancellationToken,
        channel: NotificationChannel,
        domain: NotificationDomain,
        enabled: bool,
        user_id: &str,
    ) -> Result<()> {
        if !toggleable(channel)?.contains(&domain) {
            return Err(Error::validation(format!(
                "domain `{domain}` cannot be toggled on channel `{channel}`"
            )));
        }

        loop {
            super::ensure_active(cancel, "toggle notification channel domain")?;
            let user = self
                .users
                .find_by_id(user_id)
                .await?
                .ok_or_else(|| Error::relation_not_found("user", user_id))?;

            let expected = user.disabled_domains_raw(channel).map(str::to_string);
            let current = user.disabled_domains(channel);
            let Some(updated) = merge_disabled_domains(current, domain, enabled) else {
                return Ok(());
            };
            let updated = json::to_string_or_fallback(
                &updated,
                "[]",
                JsonContext::UserField {
                    user_id,
                    field: "disabled_notification_domains",
                },
                "Failed to serialize disabled domains",
            );

            let applied = retry_on_sqlite_busy("toggle notification domain", || {
                self.users.compare_and_set_disabled_domains(
                    user_id,
                    channel,
                    expected.clone(),
                    updated.clone(),
                )
            })
            .await?;
            if applied {
                debug!(user_id, %channel, %domain, enabled, "Notification domain toggled");
                return Ok(());
            }
            debug!(user_id, %channel, "Disabled domains changed concurrently, retrying toggle");
        }
    }
}

fn toggleable(channel: NotificationChannel) -> Result<&'static [NotificationDomain]> {
    let domains = NotificationDomain::toggleable(channel);
    if domains.is_empty() {
        return Err(Error::validation(format!(
            "channel `{channel}` has no notification preferences"
        )));
    }
    Ok(domains)
}

/// Apply one toggle to a disabled set. `None` means nothing changes.
///
/// Enabling a single domain while `all` is present only removes that domain;
/// the catch-all keeps silencing it.
fn merge_disabled_domains(
    mut disabled: Vec<String>,
    domain: NotificationDomain,
    enabled: bool,
) -> Option<Vec<String>> {
    let (tag, add) = match domain {
        NotificationDomain::DisableAll | NotificationDomain::All => {
            (NotificationDomain::All.as_ref(), enabled)
        }
        _ => (domain.as_ref(), !enabled),
    };
    let present = disabled.iter().any(|d| d == tag);
    match (add, present) {
        (true, false) => {
            disabled.push(tag.to_string());
            Some(disabled)
        }
        (false, true) => {
            disabled.retain(|d| d != tag);
            Some(disabled)
        }
        _ => None,
    }
}

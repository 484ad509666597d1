//! Local projections of the upstream user, device and contact tables.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Dispatcher;
use super::events::{ContactEvent, DeviceMetadataSnapshot, UserSnapshot};
use crate::{Error, Result};

impl Dispatcher {
    /// Mirror a user row and announce the member to their referrer and contacts.
    pub(super) async fn on_user_snapshot(
        &self,
        cancel: &CancellationToken,
        snapshot: UserSnapshot,
    ) -> Result<()> {
        let Some(user) = snapshot.current() else {
            if let Some(before) = snapshot.previous() {
                debug!(user_id = %before.id, "Deleting user projection");
                self.users.delete(&before.id).await?;
            }
            return Ok(());
        };

        crate::notification::ensure_active(cancel, "project user")?;
        self.users
            .upsert_profile(&user.to_db_model(&self.assets))
            .await?;

        let mut results = vec![
            self.on_new_referral(cancel, &snapshot).await,
            self.on_new_contact(cancel, &snapshot).await,
        ];
        let completed_registration = user.completed_registration_process
            && snapshot
                .previous()
                .is_some_and(|before| !before.completed_registration_process);
        if completed_registration {
            results.push(self.replayer.replay_all_for_user(cancel, &user.id).await);
        }
        Error::combine_results(results)
    }

    /// Mirror a device registration. A fresh token releases postponed pushes.
    pub(super) async fn on_device_metadata(
        &self,
        cancel: &CancellationToken,
        snapshot: DeviceMetadataSnapshot,
    ) -> Result<()> {
        let Some(device) = snapshot
            .device_metadata
            .as_ref()
            .filter(|d| !d.user_id.is_empty())
        else {
            return Ok(());
        };
        if snapshot
            .before
            .as_ref()
            .is_some_and(|before| before.push_notification_token == device.push_notification_token)
        {
            return Ok(());
        }

        crate::notification::ensure_active(cancel, "project device metadata")?;
        let token = (!device.push_notification_token.is_empty())
            .then(|| device.push_notification_token.clone());
        let registered = token.is_some();
        let changed = self
            .users
            .upsert_device_token(&device.user_id, &device.device_unique_id, token)
            .await?;
        if changed && registered {
            self.replayer
                .replay_all_for_user(cancel, &device.user_id)
                .await?;
        }
        Ok(())
    }

    pub(super) async fn on_contact(&self, contact: ContactEvent) -> Result<()> {
        if contact.user_id.is_empty() || contact.contact_user_id.is_empty() {
            return Ok(());
        }
        let added = self
            .users
            .add_contact(&contact.user_id, &contact.contact_user_id)
            .await?;
        if added {
            debug!(
                user_id = %contact.user_id,
                contact_user_id = %contact.contact_user_id,
                "Contact added"
            );
        }
        Ok(())
    }
}

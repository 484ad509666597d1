//! Notification fan-out.
//!
//! Turns domain events into deduplicated push, email and in-app
//! notifications, respecting per-user channel preferences.
//!
//! # Layout
//!
//! - [`handlers`] decode inbound events and decide what to send
//! - [`resolver`] finds the eligible push tokens and email address
//! - [`senders`] deliver through the providers, guarded by the ledger
//! - [`postponement`] replays push notifications held back during onboarding
//! - [`toggles`] and [`ping`] are the user-facing operations
//! - [`service`] wires everything together

pub mod analytics;
pub mod handlers;
pub mod ping;
pub mod postponement;
pub mod providers;
pub mod resolver;
pub mod senders;
pub mod service;
pub mod templates;
pub mod toggles;
pub mod types;

pub use service::NotificationService;
pub use types::{
    DeviceToken, NotificationChannel, NotificationChannelToggle, NotificationDomain,
    NotificationType, SubscriptionTopic,
};

use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Fail fast with a deadline error once `cancel` has fired.
pub(crate) fn ensure_active(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::deadline(format!("{operation} cancelled")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_active() {
        let cancel = CancellationToken::new();
        assert!(ensure_active(&cancel, "op").is_ok());
        cancel.cancel();
        assert!(ensure_active(&cancel, "op").unwrap_err().is_deadline());
    }
}

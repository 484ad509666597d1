use chrono::SecondsFormat;
use tokio_util::sync::CancellationToken;

use super::Dispatcher;
use super::events::DayOffStarted;
use crate::notification::analytics::{SetUserAttributesCommand, TrackActionCommand};
use crate::{Error, Result};

impl Dispatcher {
    /// A day off only feeds analytics; the user is not notified.
    pub(super) async fn on_day_off(
        &self,
        cancel: &CancellationToken,
        day_off: DayOffStarted,
    ) -> Result<()> {
        if day_off.user_id.is_empty() {
            return Ok(());
        }
        crate::notification::ensure_active(cancel, "track day off")?;

        let mut attributes = SetUserAttributesCommand::new(day_off.user_id.as_str())
            .attribute("Remaining days off", day_off.remaining_free_mining_sessions);
        if let Some(started_at) = day_off.started_at {
            attributes = attributes.attribute(
                "Last mining start",
                started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        let day_off_action = TrackActionCommand::new(
            format!("day_off_{}", day_off.id),
            day_off.user_id.as_str(),
            "Day off",
        );
        let tap_to_mine = TrackActionCommand::new(
            format!("tap_to_mine_{}", day_off.id),
            day_off.user_id.as_str(),
            "Tap To Mine",
        )
        .attribute("Tap to Mine", "DayOff");

        fanout::execute_concurrently(
            cancel,
            vec![
                self.analytics.set_user_attributes(&attributes),
                self.analytics.track_action(&day_off_action),
                self.analytics.track_action(&tap_to_mine),
            ],
        )
        .await
        .map_err(Error::from)
    }
}

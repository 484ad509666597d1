//! Push gateway client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::http::{GatewayClient, is_gone};
use super::{DelayedPushNotification, PushNotification, PushProvider};
use crate::notification::types::{DeviceToken, SubscriptionTopic};
use crate::{Error, Result};

/// Push provider backed by an HTTP gateway.
///
/// * `POST {base}/send` delivers to one device token.
/// * `POST {base}/broadcast` delivers to a topic.
/// * `POST {base}/broadcast/delayed` delivers to a topic after a delay.
pub struct HttpPushProvider {
    gateway: GatewayClient,
}

impl HttpPushProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            gateway: GatewayClient::new("push", base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(&self, notification: &PushNotification<DeviceToken>) -> Result<()> {
        let request = self.gateway.post("send")?.json(notification);
        let response = self.gateway.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            debug!(target_token = %notification.target, "Push notification sent");
            return Ok(());
        }
        if is_gone(status) {
            return Err(Error::InvalidTarget(format!(
                "push token {} rejected with status {}",
                notification.target, status
            )));
        }
        Err(self.gateway.error_for_status(response).await)
    }

    async fn broadcast(&self, notification: &PushNotification<SubscriptionTopic>) -> Result<()> {
        let request = self.gateway.post("broadcast")?.json(notification);
        let response = self.gateway.execute(request).await?;
        if response.status().is_success() {
            debug!(topic = %notification.target, "Push broadcast sent");
            return Ok(());
        }
        Err(self.gateway.error_for_status(response).await)
    }

    async fn broadcast_delayed(&self, notification: &DelayedPushNotification) -> Result<()> {
        let request = self.gateway.post("broadcast/delayed")?.json(notification);
        let response = self.gateway.execute(request).await?;
        if response.status().is_success() {
            debug!(
                topic = %notification.notification.target,
                delay_secs = notification.delay_secs,
                "Delayed push broadcast scheduled"
            );
            return Ok(());
        }
        Err(self.gateway.error_for_status(response).await)
    }
}

//! In-app feed client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::http::GatewayClient;
use super::{InAppFeed, InAppParcel};
use crate::Result;
use crate::notification::types::InAppNotificationsUserAuthToken;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    user_id: &'a str,
}

/// In-app feed provider.
///
/// One instance per feed group: entries go to
/// `POST {base}/feeds/{feed}/{recipient}`, user tokens come from
/// `POST {base}/tokens`.
pub struct HttpInAppFeed {
    gateway: GatewayClient,
    feed: String,
}

impl HttpInAppFeed {
    pub fn new(
        base_url: &str,
        feed: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            gateway: GatewayClient::new("inapp", base_url, api_key, timeout)?,
            feed: feed.into(),
        })
    }
}

#[async_trait]
impl InAppFeed for HttpInAppFeed {
    async fn send(&self, parcel: &InAppParcel, recipient: &str) -> Result<()> {
        let recipient: String =
            url::form_urlencoded::byte_serialize(recipient.as_bytes()).collect();
        let request = self
            .gateway
            .post(&format!("feeds/{}/{}", self.feed, recipient))?
            .json(parcel);
        let response = self.gateway.execute(request).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(self.gateway.error_for_status(response).await)
    }

    async fn create_user_token(&self, user_id: &str) -> Result<InAppNotificationsUserAuthToken> {
        let request = self
            .gateway
            .post("tokens")?
            .json(&CreateTokenRequest { user_id });
        let response = self.gateway.execute(request).await?;
        if !response.status().is_success() {
            return Err(self.gateway.error_for_status(response).await);
        }
        response
            .json::<InAppNotificationsUserAuthToken>()
            .await
            .map_err(|e| crate::Error::Provider(format!("inapp token response: {e}")))
    }
}

//! Email gateway client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::http::GatewayClient;
use super::{EmailParcel, EmailProvider, Participant};
use crate::Result;

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    #[serde(flatten)]
    parcel: &'a EmailParcel,
    to: &'a Participant,
}

/// Email provider backed by `POST {base}/send`.
pub struct HttpEmailProvider {
    gateway: GatewayClient,
}

impl HttpEmailProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            gateway: GatewayClient::new("email", base_url, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn send(&self, parcel: &EmailParcel, recipient: &Participant) -> Result<()> {
        let request = self.gateway.post("send")?.json(&SendEmailRequest {
            parcel,
            to: recipient,
        });
        let response = self.gateway.execute(request).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(self.gateway.error_for_status(response).await)
    }
}

//! Shared HTTP plumbing for the gateway-backed providers.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::{Error, Result};

const MAX_ERROR_BODY_CHARS: usize = 500;

/// JSON client for one provider gateway.
#[derive(Debug, Clone)]
pub(crate) struct GatewayClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    name: &'static str,
}

impl GatewayClient {
    pub(crate) fn new(
        name: &'static str,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid {name} gateway url {base_url}: {e}")))?;
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build {name} http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            name,
        })
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Provider(format!("{} gateway path {path}: {e}", self.name)))
    }

    pub(crate) fn post(&self, path: &str) -> Result<RequestBuilder> {
        let mut request = self.client.post(self.url(path)?);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        Ok(request)
    }

    /// Send a request and map transport failures to provider errors.
    pub(crate) async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| Error::Provider(format!("{} request failed: {}", self.name, e)))
    }

    /// Turn a non-success response into a provider error carrying the body.
    pub(crate) async fn error_for_status(&self, response: Response) -> Error {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        Error::Provider(format!(
            "{} failed: status {} body {}",
            self.name,
            status,
            truncate(&body, MAX_ERROR_BODY_CHARS)
        ))
    }
}

/// Statuses meaning the addressed target no longer exists.
pub(crate) fn is_gone(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

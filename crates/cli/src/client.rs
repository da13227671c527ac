//! API client for a running conduit-expose agent

use anyhow::{Context, Result};
use expose_lib::StatusResponse;
use reqwest::{Client, StatusCode};
use url::Url;

/// Header the agent expects the shared secret in
const AUTH_HEADER: &str = "X-Conduit-Auth";

/// API client for the agent's `/status` endpoint
pub struct ApiClient {
    client: Client,
    base_url: Url,
    auth: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid agent URL")?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Fetch the latest snapshot
    pub async fn status(&self) -> Result<StatusResponse> {
        let url = self.base_url.join("status").context("Invalid path")?;

        let mut request = self.client.get(url);
        if let Some(auth) = &self.auth {
            request = request.header(AUTH_HEADER, auth);
        }

        let response = request.send().await.context("Failed to send request")?;

        match response.status() {
            status if status.is_success() => {
                response.json().await.context("Failed to parse snapshot")
            }
            StatusCode::UNAUTHORIZED => {
                anyhow::bail!("Agent rejected the auth secret (set EXPOSE_AUTH or --auth)")
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                anyhow::bail!("Agent has not published a snapshot yet, retry shortly")
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }
    }
}

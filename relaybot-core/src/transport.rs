// ABOUTME: Client-server API calls used by the sync loop: filter creation, long-poll sync, room join.
// ABOUTME: SyncTransport is the seam tests replace; HttpTransport talks to a real homeserver with reqwest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::event::SyncResponse;

/// Filter uploaded once per sync start: keeps timelines to a bounded window.
pub const DEFAULT_FILTER: &str = r#"{"room":{"timeline":{"limit":50}}}"#;

/// Extra time the HTTP client waits beyond the server-side long-poll timeout.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Upload `filter_json` for `user_id`, returning the server's filter ID.
    async fn create_filter(&self, user_id: &str, filter_json: &str) -> Result<String>;

    /// One long-poll request. An empty `since` requests an initial sync.
    async fn sync(&self, since: &str, filter_id: &str, timeout_ms: u64) -> Result<SyncResponse>;

    async fn join_room(&self, room_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    filter_id: String,
}

/// reqwest-backed transport authenticated with an access token.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: reqwest::Url,
    access_token: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(home_server: &str, access_token: &str) -> Result<Self> {
        let base = format!("{}/_matrix/client/r0", home_server.trim_end_matches('/'));
        let base_url = reqwest::Url::parse(&base)
            .with_context(|| format!("Invalid home server URL: {}", home_server))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Home server URL cannot be used as a base: {}", home_server);
        }
        Ok(Self {
            base_url,
            access_token: access_token.to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(200).collect();
        anyhow::bail!("{} failed with HTTP {}: {}", what, status, preview)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn create_filter(&self, user_id: &str, filter_json: &str) -> Result<String> {
        let filter: serde_json::Value =
            serde_json::from_str(filter_json).context("Filter is not valid JSON")?;
        let response = self
            .client
            .post(self.endpoint(&["user", user_id, "filter"]))
            .bearer_auth(&self.access_token)
            .json(&filter)
            .send()
            .await
            .context("Filter request failed")?;
        let response = Self::check(response, "Filter creation").await?;
        let body: FilterResponse = response
            .json()
            .await
            .context("Failed to decode filter response")?;
        Ok(body.filter_id)
    }

    async fn sync(&self, since: &str, filter_id: &str, timeout_ms: u64) -> Result<SyncResponse> {
        let mut query = vec![
            ("timeout", timeout_ms.to_string()),
            ("filter", filter_id.to_string()),
        ];
        if !since.is_empty() {
            query.push(("since", since.to_string()));
        }

        let response = self
            .client
            .get(self.endpoint(&["sync"]))
            .bearer_auth(&self.access_token)
            .query(&query)
            .timeout(Duration::from_millis(timeout_ms) + REQUEST_TIMEOUT_MARGIN)
            .send()
            .await
            .context("Sync request failed")?;
        let response = Self::check(response, "Sync").await?;
        let mut batch: SyncResponse = response
            .json()
            .await
            .context("Failed to decode sync response")?;
        batch.fill_room_ids();
        Ok(batch)
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["join", room_id]))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Join request failed")?;
        Self::check(response, "Join").await?;
        Ok(())
    }
}

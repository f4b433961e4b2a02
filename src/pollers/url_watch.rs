// ABOUTME: url_watch poller - fetches a URL on an interval and logs when its content changes
// ABOUTME: Change detection uses ETag, then Last-Modified, then body length as the signature

use anyhow::{Context, Result};
use async_trait::async_trait;
use relaybot_core::{Poller, PollerRegistry, ServiceRecord};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SERVICE_TYPE: &str = "url_watch";

const DEFAULT_INTERVAL_SECS: u64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct UrlWatchConfig {
    pub url: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

pub struct UrlWatchPoller {
    config: UrlWatchConfig,
    http: reqwest::Client,
    last_signature: Mutex<Option<String>>,
}

impl UrlWatchPoller {
    pub fn from_service(service: &ServiceRecord) -> Result<Self> {
        let config: UrlWatchConfig = serde_json::from_value(service.config.clone())
            .with_context(|| format!("Invalid url_watch config for {}", service.service_id))?;
        reqwest::Url::parse(&config.url)
            .with_context(|| format!("Invalid url_watch url: {}", config.url))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            http,
            last_signature: Mutex::new(None),
        })
    }

    pub fn last_signature(&self) -> Option<String> {
        self.last_signature
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    async fn fetch_signature(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.config.url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", self.config.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}", self.config.url, status);
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(etag) = header(reqwest::header::ETAG) {
            return Ok(format!("etag:{}", etag));
        }
        if let Some(modified) = header(reqwest::header::LAST_MODIFIED) {
            return Ok(format!("modified:{}", modified));
        }

        let body = response.bytes().await.context("Failed to read response body")?;
        Ok(format!("len:{}", body.len()))
    }
}

#[async_trait]
impl Poller for UrlWatchPoller {
    fn interval_secs(&self) -> u64 {
        self.config.interval_secs
    }

    async fn on_poll(&self, service: &ServiceRecord) -> Result<()> {
        let signature = self.fetch_signature().await?;
        let previous = {
            let mut last = self
                .last_signature
                .lock()
                .map_err(|e| anyhow::anyhow!("Signature mutex poisoned: {}", e))?;
            last.replace(signature.clone())
        };

        match previous {
            None => tracing::debug!(
                service_id = %service.service_id,
                url = %self.config.url,
                signature = %signature,
                "Watched URL baseline recorded"
            ),
            Some(prev) if prev != signature => tracing::info!(
                service_id = %service.service_id,
                owner = %service.owner_user_id,
                url = %self.config.url,
                previous = %prev,
                current = %signature,
                "Watched URL changed"
            ),
            Some(_) => {}
        }
        Ok(())
    }
}

pub fn register(registry: &mut PollerRegistry) {
    registry.register(SERVICE_TYPE, |service| {
        Ok(Arc::new(UrlWatchPoller::from_service(service)?) as Arc<dyn Poller>)
    });
}

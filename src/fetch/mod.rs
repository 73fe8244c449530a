use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::error::{AppError, Context, Result};
use crate::rapid::FilterSource;

pub mod line;
pub mod snapshot;

pub use line::{Line, LineType};
pub use snapshot::SnapshotRecord;

const DEFAULT_BASE_URL: &str = "https://api.exchangedataset.cc/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of one filter request.
#[derive(Debug, Clone)]
pub struct FilterParam {
    pub exchange: String,
    pub channels: Vec<String>,
    /// Minute index: Unix seconds divided by 60.
    pub minute: i64,
    pub format: String,
}

/// Parameters of one snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotParam {
    pub exchange: String,
    pub channels: Vec<String>,
    pub at: DateTime<Utc>,
    pub format: String,
}

/// Authenticated client for the historical market-data HTTP API.
///
/// The builder-configured timeouts are the only per-request deadlines in the
/// program; callers impose an overall deadline through cancellation.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    apikey: String,
    base_url: String,
}

impl ApiClient {
    pub fn new(apikey: impl Into<String>) -> Result<Self> {
        Self::with_base_url(apikey, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(apikey: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to construct HTTP client")?;
        Ok(Self {
            client,
            apikey: apikey.into(),
            base_url: base_url.into(),
        })
    }

    /// Calls the filter endpoint for one minute and parses the typed lines.
    pub async fn filter(&self, param: &FilterParam) -> Result<Vec<Line>> {
        let body = self.filter_raw(param).await?;
        line::parse_filter_body(&param.exchange, &body)
    }

    /// Calls the filter endpoint and returns the raw response body.
    pub async fn filter_raw(&self, param: &FilterParam) -> Result<String> {
        let url = format!(
            "{}/filter/{}/{}",
            self.base_url, param.exchange, param.minute
        );
        self.fetch_text(&url, &param.channels, &param.format).await
    }

    /// Calls the snapshot endpoint and parses the records.
    pub async fn snapshot(&self, param: &SnapshotParam) -> Result<Vec<SnapshotRecord>> {
        let body = self.snapshot_raw(param).await?;
        snapshot::parse_snapshot_body(&body)
    }

    /// Calls the snapshot endpoint and returns the raw response body.
    pub async fn snapshot_raw(&self, param: &SnapshotParam) -> Result<String> {
        let nanos = param
            .at
            .timestamp_nanos_opt()
            .ok_or_else(|| AppError::message("snapshot timestamp out of range"))?;
        let url = format!("{}/snapshot/{}/{}", self.base_url, param.exchange, nanos);
        self.fetch_text(&url, &param.channels, &param.format).await
    }

    async fn fetch_text(&self, url: &str, channels: &[String], format: &str) -> Result<String> {
        let query: Vec<(&str, &str)> = channels
            .iter()
            .map(|channel| ("channels", channel.as_str()))
            .chain(std::iter::once(("format", format)))
            .collect();
        let response = self
            .client
            .get(url)
            .query(&query)
            .bearer_auth(&self.apikey)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Minute-filter source backed by the HTTP API, one request per minute.
pub struct HttpFilterSource {
    client: ApiClient,
    exchange: String,
    channels: Vec<String>,
}

impl HttpFilterSource {
    pub fn new(client: ApiClient, exchange: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            client,
            exchange: exchange.into(),
            channels,
        }
    }
}

#[async_trait]
impl FilterSource for HttpFilterSource {
    async fn fetch_minute(&self, minute: i64) -> Result<Vec<Line>> {
        let param = FilterParam {
            exchange: self.exchange.clone(),
            channels: self.channels.clone(),
            minute,
            format: "json".to_string(),
        };
        self.client.filter(&param).await
    }
}

//! HTTP client for the external inventory service.
//!
//! Fetches the asset and user collections page by page until the service
//! reports end of data, with bounded retry on transient failures. The client
//! hands raw JSON rows to the sync layer; it knows nothing about the local
//! mirror schema.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "aim-client";

/// Collections served by the external inventory API.
pub const USERS_PATH: &str = "users";
pub const ASSETS_PATH: &str = "hardware";

/// Relations expanded inline on each collection, so department and assignee
/// references arrive as nested objects rather than bare ids.
pub const USERS_EXPAND: &str = "department";
pub const ASSETS_EXPAND: &str = "company,assigned_to";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unexpected payload from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn status_disposition(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn request_error_disposition(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    pub user_page_size: u64,
    pub asset_page_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout: Duration::from_secs(30),
            user_agent: None,
            retry: RetryPolicy::default(),
            user_page_size: 200,
            asset_page_size: 100,
        }
    }
}

/// One page of a paginated collection listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub rows: Vec<JsonValue>,
}

/// Anything the sync engine can pull complete collections from. Implemented
/// by [`InventoryClient`] and by fixture sources in tests.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn fetch_users(&self) -> Result<Vec<JsonValue>, ClientError>;
    async fn fetch_assets(&self) -> Result<Vec<JsonValue>, ClientError>;
}

#[async_trait]
trait PageFetch: Sync {
    async fn page(&self, limit: u64, offset: u64) -> Result<PageEnvelope, ClientError>;
}

/// Append pages until the collection is drained. A short page normally means
/// end of data, but a server may silently cap `limit` below the requested
/// page size; when the envelope's `total` says rows remain, a short page
/// keeps the loop going instead of truncating the collection.
async fn drain_pages(source: &dyn PageFetch, page_size: u64) -> Result<Vec<JsonValue>, ClientError> {
    let mut rows = Vec::new();
    let mut offset = 0u64;
    let mut declared_total = None;
    loop {
        let page = source.page(page_size, offset).await?;
        let got = page.rows.len() as u64;
        if page.total.is_some() {
            declared_total = page.total;
        }
        rows.extend(page.rows);
        if got == 0 {
            break;
        }
        if got < page_size && declared_total.map_or(true, |total| rows.len() as u64 >= total) {
            break;
        }
        offset += got;
    }
    if let Some(total) = declared_total {
        if rows.len() as u64 != total {
            warn!(
                declared = total,
                received = rows.len(),
                "collection drained to a different size than the server declared"
            );
        }
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct InventoryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
    user_page_size: u64,
    asset_page_size: u64,
}

struct CollectionCursor<'a> {
    client: &'a InventoryClient,
    path: &'a str,
    expand: &'a str,
}

#[async_trait]
impl PageFetch for CollectionCursor<'_> {
    async fn page(&self, limit: u64, offset: u64) -> Result<PageEnvelope, ClientError> {
        self.client.get_page(self.path, limit, offset, self.expand).await
    }
}

impl InventoryClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            retry: config.retry,
            user_page_size: config.user_page_size.max(1),
            asset_page_size: config.asset_page_size.max(1),
        })
    }

    /// Retrieve the entire collection at `path`, not just the first page.
    pub async fn fetch_all(
        &self,
        path: &str,
        page_size: u64,
        expand: &str,
    ) -> Result<Vec<JsonValue>, ClientError> {
        let cursor = CollectionCursor {
            client: self,
            path,
            expand,
        };
        let rows = drain_pages(&cursor, page_size)
            .instrument(info_span!("fetch_all", path, page_size))
            .await?;
        debug!(path, rows = rows.len(), "collection fetch complete");
        Ok(rows)
    }

    async fn get_page(
        &self,
        path: &str,
        limit: u64,
        offset: u64,
        expand: &str,
    ) -> Result<PageEnvelope, ClientError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let resp_result = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(&[
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                    ("expand", expand.to_string()),
                ])
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return resp.json::<PageEnvelope>().await.map_err(|source| {
                            ClientError::Payload {
                                url: final_url,
                                source,
                            }
                        });
                    }

                    if status_disposition(status) == RetryDisposition::Retryable
                        && attempt < self.retry.max_retries
                    {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(ClientError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if request_error_disposition(&err) == RetryDisposition::Retryable
                        && attempt < self.retry.max_retries
                    {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ClientError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl InventorySource for InventoryClient {
    async fn fetch_users(&self) -> Result<Vec<JsonValue>, ClientError> {
        self.fetch_all(USERS_PATH, self.user_page_size, USERS_EXPAND).await
    }

    async fn fetch_assets(&self) -> Result<Vec<JsonValue>, ClientError> {
        self.fetch_all(ASSETS_PATH, self.asset_page_size, ASSETS_EXPAND).await
    }
}

//! CoinGecko markets source.
//!
//! Uses `/coins/markets` for the tracked list and `/ping` as a liveness check.
//! The public API and its mirror share one response shape, so the same type
//! serves both the primary and the backup endpoint.

use std::time::Duration;

use tracing::debug;

use crate::error::UpstreamError;
use crate::market_data::{MarketCoin, MarketsQuery, PriceSource};

pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

const DEFAULT_USER_AGENT: &str = concat!("coindash/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the error body kept in [`UpstreamError::Status`].
const MAX_ERROR_BODY_BYTES: usize = 256;

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

pub struct CoinGeckoMarketsSource {
    client: reqwest::Client,
    base_url: String,
    name: String,
    timeout: Duration,
    user_agent: String,
}

impl CoinGeckoMarketsSource {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: COINGECKO_API_BASE.to_string(),
            name: "coingecko".to_string(),
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Point the source at another host, e.g. the mirror or a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .header("User-Agent", &self.user_agent)
            .timeout(self.timeout)
    }

    fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout {
                endpoint: self.name.clone(),
                timeout: self.timeout,
            }
        } else {
            UpstreamError::Transport {
                endpoint: self.name.clone(),
                message: err.to_string(),
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = truncate_body(response.text().await.unwrap_or_default());
            return Err(UpstreamError::Status {
                endpoint: self.name.clone(),
                status,
                body,
            });
        }

        Ok(response)
    }
}

impl Default for CoinGeckoMarketsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PriceSource for CoinGeckoMarketsSource {
    async fn fetch_markets(&self, query: &MarketsQuery) -> Result<Vec<MarketCoin>, UpstreamError> {
        debug!(endpoint = %self.name, base_url = %self.base_url, "fetching markets");

        let request = self.request("/coins/markets").query(&query.as_params());
        let response = self.send(request).await?;

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode {
            endpoint: self.name.clone(),
            message: e.to_string(),
        })
    }

    async fn ping(&self) -> Result<u16, UpstreamError> {
        let response = self.send(self.request("/ping")).await?;
        Ok(response.status().as_u16())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

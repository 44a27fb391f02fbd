//! HTTP fetch with a fixed user agent and bounded exponential retry.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

/// Extra attempts allowed after a transient failure, with the pause doubling
/// from `first_pause` up to `max_pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub first_pause: Duration,
    pub max_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            first_pause: Duration::from_millis(500),
            max_pause: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Pause taken before retry number `retry` (zero-based).
    pub fn pause_before(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .map_or(self.max_pause, |factor| self.first_pause.saturating_mul(factor))
            .min(self.max_pause)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: format!("adwatch/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    /// Throttling, server errors, timeouts and refused connections are worth
    /// another attempt; everything else fails for good.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        async {
            let mut retry = 0;
            loop {
                let failure = match self.attempt(url).await {
                    Ok(response) => return Ok(response),
                    Err(failure) => failure,
                };
                if !failure.is_transient() || retry >= self.retry.retries {
                    return Err(failure);
                }
                let pause = self.retry.pause_before(retry);
                warn!(error = %failure, retry, pause_ms = pause.as_millis() as u64, "transient fetch failure");
                tokio::time::sleep(pause).await;
                retry += 1;
            }
        }
        .instrument(info_span!("http_fetch", url))
        .await
    }

    async fn attempt(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = response.bytes().await?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

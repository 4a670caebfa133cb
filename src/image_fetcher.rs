use crate::config::FetcherConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Accept header advertising the image formats the pipeline can decode
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// Errors internal to a single download attempt. Never escape the fetcher:
/// the public contract converts every failure into `None`.
#[derive(Debug, Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(StatusCode),
}

/// Downloads candidate images over HTTP with a bounded timeout.
///
/// Publishers commonly gate their CDNs on a referer check, so the article's
/// original URL is forwarded when the candidate carries one.
pub struct ImageFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl ImageFetcher {
    /// Create a new fetcher with a shared HTTP client
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent header")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Download a candidate image, returning its raw bytes on HTTP 200.
    ///
    /// All transport and status failures are logged and collapsed into
    /// `None`; retry behavior is governed by `FetcherConfig::max_retries`
    /// (default: single attempt).
    pub async fn fetch(&self, url: &str, referer: Option<&str>) -> Option<Bytes> {
        let attempts = self.config.max_retries + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff()).await;
            }

            match self.try_fetch(url, referer).await {
                Ok(bytes) => return Some(bytes),
                Err(e) => {
                    debug!(
                        url = %url,
                        attempt = attempt + 1,
                        error = %e,
                        "Candidate download failed"
                    );
                }
            }
        }

        None
    }

    /// Single download attempt
    async fn try_fetch(&self, url: &str, referer: Option<&str>) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                request = request.header(REFERER, value);
            }
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_builds_from_defaults() {
        let fetcher = ImageFetcher::new(&FetcherConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_rejects_unprintable_user_agent() {
        let config = FetcherConfig {
            user_agent: "bad\nagent".to_string(),
            ..FetcherConfig::default()
        };
        assert!(ImageFetcher::new(&config).is_err());
    }
}

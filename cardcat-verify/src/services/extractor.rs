//! Vision extractor client
//!
//! The `Extractor` trait is the seam between the catalog and whatever reads
//! cards out of photos. `HttpExtractor` talks to a JSON endpoint:
//!
//! - `POST {endpoint}/v1/scan`   images in, `ScanOutcome` out
//! - `POST {endpoint}/v1/prompt` images plus free-form prompt in, `{"text": ...}` out
//!
//! Images travel base64-encoded. Each client owns its own rate limiter.

use crate::models::{CardImage, ScanOutcome};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Extractor errors
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// No endpoint or API key configured
    #[error("Extractor not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Extractor request timed out")]
    Timeout,

    /// Endpoint throttled us (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ExtractorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExtractorError::Timeout
        } else if e.is_decode() {
            ExtractorError::Parse(e.to_string())
        } else {
            ExtractorError::Network(e.to_string())
        }
    }
}

/// Card reader backed by a vision model
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extractor identifier for logs
    fn source_id(&self) -> &'static str;

    /// Full extraction of one card
    async fn scan(
        &self,
        image: &CardImage,
        back: Option<&CardImage>,
    ) -> Result<ScanOutcome, ExtractorError>;

    /// Free-form prompt about the same images; the raw response text is returned
    async fn send_prompt(
        &self,
        image: &CardImage,
        prompt: &str,
        back: Option<&CardImage>,
    ) -> Result<String, ExtractorError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireImage<'a> {
    media_type: &'a str,
    data: String,
}

impl<'a> From<&'a CardImage> for WireImage<'a> {
    fn from(image: &'a CardImage) -> Self {
        Self {
            media_type: &image.media_type,
            data: image.to_base64(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest<'a> {
    image: WireImage<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_image: Option<WireImage<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptRequest<'a> {
    image: WireImage<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_image: Option<WireImage<'a>>,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    text: String,
}

/// HTTP extractor client
pub struct HttpExtractor {
    client: Client,
    endpoint: String,
    api_key: String,
    /// Requests per minute allowed for this session
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpExtractor {
    /// Create a client for `endpoint`
    ///
    /// `requests_per_minute` of zero is treated as one.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self, ExtractorError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ExtractorError::NotConfigured("empty endpoint".to_string()));
        }

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ExtractorError::NotConfigured("empty API key".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ExtractorError::Network(format!("Client init failed: {}", e)))?;

        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            client,
            endpoint,
            api_key,
            rate_limiter,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ExtractorError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.endpoint, path);
        tracing::debug!(url = %url, "Calling extractor");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExtractorError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Api(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn source_id(&self) -> &'static str {
        "http"
    }

    async fn scan(
        &self,
        image: &CardImage,
        back: Option<&CardImage>,
    ) -> Result<ScanOutcome, ExtractorError> {
        let request = ScanRequest {
            image: image.into(),
            back_image: back.map(WireImage::from),
        };

        let response = self.post("/v1/scan", &request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ExtractorError::Parse(e.to_string()))
    }

    async fn send_prompt(
        &self,
        image: &CardImage,
        prompt: &str,
        back: Option<&CardImage>,
    ) -> Result<String, ExtractorError> {
        let request = PromptRequest {
            image: image.into(),
            back_image: back.map(WireImage::from),
            prompt,
        };

        let response = self.post("/v1/prompt", &request).await?;
        let body = response.text().await?;
        let parsed: PromptResponse =
            serde_json::from_str(&body).map_err(|e| ExtractorError::Parse(e.to_string()))?;
        Ok(parsed.text)
    }
}

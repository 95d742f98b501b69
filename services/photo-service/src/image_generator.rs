//! Image generation gateway.
//!
//! Forwards a plain-text prompt to an OpenAI-compatible
//! `POST /images/generations` endpoint and returns the URL of the single
//! square image it produces. Every call goes upstream: nothing is cached and
//! failures are returned as-is without retrying.

use crate::config::GeneratorConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Image generation failures
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("image generation request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("image generation failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("image generation response contained no image URL")]
    MissingImage,

    #[error("image generation returned an unreadable response: {0}")]
    InvalidResponse(String),
}

/// Gateway seam used by the HTTP layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image for `prompt` and return its URL
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Client for the OpenAI images API
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    size: String,
    quality: String,
    prompt_prefix: String,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: String,
    n: u8,
    size: &'a str,
    quality: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl OpenAiImageGenerator {
    /// Build a generator from configuration
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            size: config.size.clone(),
            quality: config.quality.clone(),
            prompt_prefix: config.prompt_prefix.clone(),
        })
    }

    fn generations_url(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }

    fn build_request(&self, prompt: &str) -> ImageRequest<'_> {
        ImageRequest {
            model: &self.model,
            prompt: format!("{}{}", self.prompt_prefix, prompt.trim()),
            n: 1,
            size: &self.size,
            quality: &self.quality,
        }
    }

    /// Pull the upstream error message out of a failed response body,
    /// falling back to the raw text.
    fn upstream_message(status: StatusCode, body: &str) -> String {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => parsed.error.message,
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => body.trim().to_string(),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        metrics::counter!("photos.generation.requests").increment(1);

        let response = self
            .client
            .post(self.generations_url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| {
                metrics::counter!("photos.generation.failures").increment(1);
                GenerationError::Network(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Failed to read image generation error body");
                    String::new()
                }
            };
            let message = Self::upstream_message(status, &body);
            warn!(
                status = status.as_u16(),
                message = %message,
                "Image generation rejected upstream"
            );
            metrics::counter!("photos.generation.failures").increment(1);
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| {
            metrics::counter!("photos.generation.failures").increment(1);
            GenerationError::Network(e)
        })?;
        let parsed: ImageResponse = serde_json::from_str(&body).map_err(|e| {
            metrics::counter!("photos.generation.failures").increment(1);
            GenerationError::InvalidResponse(e.to_string())
        })?;
        let url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or(GenerationError::MissingImage)?;

        debug!(image_url = %url, "Image generated");
        Ok(url)
    }
}

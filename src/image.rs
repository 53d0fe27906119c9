use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ConfigError, ServiceError};
use crate::http;

/// A generated image together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGenerationResult {
    /// Where the image came from: a URL, or `inline` for embedded data.
    pub source: String,
    pub seed: i64,
    /// The request body sent to the image service.
    pub request_payload: Value,
    pub duration: Duration,
    pub image_data: Vec<u8>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generates one image. Never retries; that is up to the caller.
    async fn generate(
        &self,
        prompt: &str,
        styles: &[String],
    ) -> Result<ImageGenerationResult, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub aspect_ratios_selection: String,
    pub performance_selection: String,
    pub style_selections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    base64: Option<String>,
    seed: Seed,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seed {
    Number(i64),
    Text(String),
}

impl Seed {
    fn value(&self) -> Result<i64, ServiceError> {
        match self {
            Seed::Number(seed) => Ok(*seed),
            Seed::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ServiceError::InvalidResponse(format!("seed {text:?} is not a number"))),
        }
    }
}

/// Client for a Fooocus-API style `/v1/generation/text-to-image` service.
pub struct FooocusClient {
    http: Client,
    base_url: String,
    negative_prompt: String,
    aspect_ratio: String,
    performance: String,
    advanced_params: Option<Value>,
}

impl FooocusClient {
    pub fn new(config: &Config, http: Client) -> Result<Self, ConfigError> {
        Ok(Self {
            http,
            base_url: config.image_generation_url.clone(),
            negative_prompt: config.negative_prompt.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            performance: config.performance.clone(),
            advanced_params: config.advanced_params()?,
        })
    }

    pub fn request(&self, prompt: &str, styles: &[String]) -> ImageRequest {
        ImageRequest {
            prompt: prompt.to_string(),
            negative_prompt: self.negative_prompt.clone(),
            aspect_ratios_selection: self.aspect_ratio.clone(),
            performance_selection: self.performance.clone(),
            style_selections: styles.to_vec(),
            advanced_params: self.advanced_params.clone(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self.http.get(url).send().await?;
        let bytes = http::check_status(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn resolve(&self, image: GeneratedImage) -> Result<(String, Vec<u8>), ServiceError> {
        match (image.url, image.base64) {
            (Some(url), _) if url.starts_with("data:") => {
                let data = decode_data_url(&url)?;
                Ok(("inline".to_string(), data))
            }
            (url, Some(encoded)) if !encoded.is_empty() => {
                let data = STANDARD
                    .decode(encoded.trim())
                    .map_err(|err| ServiceError::InvalidDataUrl(err.to_string()))?;
                Ok((url.unwrap_or_else(|| "inline".to_string()), data))
            }
            (Some(url), _) => {
                let data = self.fetch(&url).await?;
                Ok((url, data))
            }
            (None, _) => Err(ServiceError::InvalidResponse(
                "image result has neither url nor base64 data".to_string(),
            )),
        }
    }
}

#[async_trait]
impl ImageGenerator for FooocusClient {
    async fn generate(
        &self,
        prompt: &str,
        styles: &[String],
    ) -> Result<ImageGenerationResult, ServiceError> {
        let started = Instant::now();
        let request = self.request(prompt, styles);
        let request_payload = serde_json::to_value(&request)
            .map_err(|err| ServiceError::InvalidResponse(err.to_string()))?;
        debug!(prompt, ?styles, "Requesting image");

        let response = self
            .http
            .post(http::join(&self.base_url, "v1/generation/text-to-image"))
            .json(&request)
            .send()
            .await?;
        let images: Vec<GeneratedImage> = http::check_status(response).await?.json().await?;
        let image = images.into_iter().next().ok_or_else(|| {
            ServiceError::InvalidResponse("image service returned no images".to_string())
        })?;
        let seed = image.seed.value()?;
        let (source, image_data) = self.resolve(image).await?;

        let duration = started.elapsed();
        info!(seed, bytes = image_data.len(), duration = ?duration, "Image generated");
        Ok(ImageGenerationResult {
            source,
            seed,
            request_payload,
            duration,
            image_data,
        })
    }
}

/// Decodes a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ServiceError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ServiceError::InvalidDataUrl("missing data: prefix".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ServiceError::InvalidDataUrl("missing ',' separator".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(ServiceError::InvalidDataUrl(format!(
            "unsupported encoding in {meta:?}"
        )));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|err| ServiceError::InvalidDataUrl(err.to_string()))
}

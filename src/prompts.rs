//! Deriving image prompts from a transcript with a text-generation model.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MalformedOutput, PromptGenerationError, ServiceError};
use crate::http;

/// Text-generation engine returning raw, unparsed output.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServiceError>;
}

/// Client for Ollama's `/api/generate`.
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(config: &Config, http: Client) -> Self {
        Self {
            http,
            base_url: config.ollama_url.clone(),
        }
    }
}

#[async_trait]
impl TextModel for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ServiceError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = self
            .http
            .post(http::join(&self.base_url, "api/generate"))
            .json(&request)
            .send()
            .await?;
        let body: GenerateResponse = http::check_status(response).await?.json().await?;
        Ok(body.response)
    }
}

/// Asks the text model for prompts and validates what comes back.
#[derive(Clone)]
pub struct PromptGenerator {
    model: Arc<dyn TextModel>,
    max_attempts: u32,
}

impl PromptGenerator {
    pub fn new(model: Arc<dyn TextModel>, max_attempts: u32) -> Self {
        Self {
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the prompts the model produced, or nothing at all.
    ///
    /// Malformed output re-issues the same request until `max_attempts` is
    /// used up. Transport failures are returned straight away.
    pub async fn generate(
        &self,
        transcript: &str,
        model: &str,
        count: u32,
    ) -> Result<Vec<String>, PromptGenerationError> {
        let instruction = instruction(transcript, count);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let raw = self
                .model
                .generate(model, &instruction)
                .await
                .map_err(PromptGenerationError::Model)?;
            debug!(attempt, raw = %raw, "Text model responded");

            match parse_prompts(&raw) {
                Ok(prompts) => return Ok(prompts),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(PromptGenerationError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Malformed prompt list, retrying"
                    );
                }
            }
        }
    }
}

fn instruction(transcript: &str, count: u32) -> String {
    format!(
        "Generate {count} image prompts for the following text: {transcript}. \
         Respond in a JSON string array format only, no other text."
    )
}

/// Parses raw model output as a JSON array of strings.
pub fn parse_prompts(raw: &str) -> Result<Vec<String>, MalformedOutput> {
    let items = match serde_json::from_str::<Value>(raw.trim())? {
        Value::Array(items) => items,
        other => return Err(MalformedOutput::WrongShape(describe(&other).to_string())),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(prompt) => Ok(prompt),
            other => Err(MalformedOutput::WrongShape(format!(
                "an array containing {}",
                describe(&other)
            ))),
        })
        .collect()
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

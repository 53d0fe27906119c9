//! Reporting progress back to the datastore service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::ServiceError;
use crate::http;
use crate::{GenerationId, GenerationStatus};

/// Partial update of a generation record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GenerationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl GenerationUpdate {
    pub fn status(status: GenerationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(GenerationStatus::Failed),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn update_transcription(
        &self,
        recording_id: &str,
        transcription: &str,
    ) -> Result<(), ServiceError>;

    async fn update_prompts(&self, recording_id: &str, prompts: &[String])
        -> Result<(), ServiceError>;

    /// Creates one pending generation record per prompt, returning their ids
    /// in prompt order.
    async fn create_image_generations(
        &self,
        recording_id: &str,
        prompts: &[String],
    ) -> Result<Vec<GenerationId>, ServiceError>;

    async fn update_image_generation(
        &self,
        recording_id: &str,
        generation_id: GenerationId,
        update: &GenerationUpdate,
    ) -> Result<(), ServiceError>;
}

#[derive(Serialize)]
struct TranscriptionBody<'a> {
    transcription: &'a str,
}

#[derive(Serialize)]
struct PromptsBody<'a> {
    prompts: &'a [String],
}

#[derive(Serialize)]
struct NewGeneration<'a> {
    audio_recording_id: &'a str,
    prompt: &'a str,
    status: GenerationStatus,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    generations: Vec<NewGeneration<'a>>,
}

#[derive(Deserialize)]
struct CreatedGeneration {
    id: GenerationId,
}

/// HTTP client for the datastore's recording routes.
pub struct DataStoreClient {
    http: Client,
    base_url: String,
}

impl DataStoreClient {
    pub fn new(config: &Config, http: Client) -> Self {
        Self {
            http,
            base_url: config.data_store_url.clone(),
        }
    }

    fn url(&self, recording_id: &str, path: &str) -> String {
        http::join(&self.base_url, &format!("recordings/{recording_id}/{path}"))
    }

    async fn put<T: Serialize + ?Sized>(&self, url: String, body: &T) -> Result<(), ServiceError> {
        let response = self.http.put(&url).json(body).send().await?;
        http::check_status(response).await?;
        debug!(url = %url, "Datastore updated");
        Ok(())
    }
}

#[async_trait]
impl Reporter for DataStoreClient {
    async fn update_transcription(
        &self,
        recording_id: &str,
        transcription: &str,
    ) -> Result<(), ServiceError> {
        self.put(
            self.url(recording_id, "transcription"),
            &TranscriptionBody { transcription },
        )
        .await
    }

    async fn update_prompts(
        &self,
        recording_id: &str,
        prompts: &[String],
    ) -> Result<(), ServiceError> {
        self.put(self.url(recording_id, "prompts"), &PromptsBody { prompts })
            .await
    }

    async fn create_image_generations(
        &self,
        recording_id: &str,
        prompts: &[String],
    ) -> Result<Vec<GenerationId>, ServiceError> {
        let body = BatchBody {
            generations: prompts
                .iter()
                .map(|prompt| NewGeneration {
                    audio_recording_id: recording_id,
                    prompt,
                    status: GenerationStatus::Pending,
                })
                .collect(),
        };
        let response = self
            .http
            .post(self.url(recording_id, "image-generations/batch"))
            .json(&body)
            .send()
            .await?;
        let created: Vec<CreatedGeneration> = http::check_status(response).await?.json().await?;
        Ok(created.into_iter().map(|generation| generation.id).collect())
    }

    async fn update_image_generation(
        &self,
        recording_id: &str,
        generation_id: GenerationId,
        update: &GenerationUpdate,
    ) -> Result<(), ServiceError> {
        self.put(
            self.url(recording_id, &format!("image-generations/{generation_id}")),
            update,
        )
        .await
    }
}

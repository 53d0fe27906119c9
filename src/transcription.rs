use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, TranscriptionTask};
use crate::error::ServiceError;
use crate::http;

/// Text recognised in a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Audio length as reported by the engine; zero when it reports none.
    pub duration: Duration,
}

/// Speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<Transcription, ServiceError>;
}

/// Client for an OpenAI-compatible speech-to-text endpoint
/// (`/v1/audio/transcriptions` and `/v1/audio/translations`).
pub struct WhisperClient {
    http: Client,
    base_url: String,
    model: String,
    language: String,
    task: TranscriptionTask,
}

#[derive(Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

impl WhisperClient {
    pub fn new(config: &Config, http: Client) -> Self {
        Self {
            http,
            base_url: config.transcription_url.clone(),
            model: config.transcription_model.clone(),
            language: config.transcription_language.clone(),
            task: config.transcription_task,
        }
    }

    fn endpoint(&self) -> String {
        let path = match self.task {
            TranscriptionTask::Translate => "v1/audio/translations",
            TranscriptionTask::Transcribe => "v1/audio/transcriptions",
        };
        http::join(&self.base_url, path)
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, path: &Path) -> Result<Transcription, ServiceError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let audio = tokio::fs::read(path).await?;
        debug!(file = %path.display(), bytes = audio.len(), "Uploading audio for transcription");

        let mut form = Form::new()
            .part("file", Part::bytes(audio).file_name(file_name))
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        // The translation endpoint always produces English.
        if self.task == TranscriptionTask::Transcribe {
            form = form.text("language", self.language.clone());
        }

        let response = self
            .http
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await?;
        let body: VerboseTranscription = http::check_status(response).await?.json().await?;

        let duration = body
            .duration
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_default();
        Ok(Transcription {
            text: body.text.trim().to_string(),
            duration,
        })
    }
}

/// Reads the duration of a WAV file from its header.
pub fn audio_duration(path: &Path) -> Result<Duration, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(hound::Error::FormatError("sample rate is zero"));
    }
    Ok(Duration::from_secs_f64(
        f64::from(reader.duration()) / f64::from(sample_rate),
    ))
}

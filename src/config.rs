use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;

/// What the speech-to-text engine should produce.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscriptionTask {
    /// Transcribe and translate into English.
    Translate,
    /// Transcribe in the spoken language.
    Transcribe,
}

/// Process configuration, built once at startup and handed to each component.
#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version)]
pub struct Config {
    #[arg(
        long = "listen",
        env = "LISTEN_ADDR",
        help = "Address the processing API listens on",
        default_value = "0.0.0.0:8001"
    )]
    pub listen_addr: SocketAddr,

    #[arg(
        long = "data-store-url",
        env = "DATA_STORE_API_URL",
        help = "Base URL of the datastore API",
        default_value = "http://127.0.0.1:8000"
    )]
    pub data_store_url: String,

    #[arg(
        long = "image-generation-url",
        env = "IMAGE_GENERATION_API_URL",
        help = "Base URL of the image generation API",
        default_value = "http://127.0.0.1:8888"
    )]
    pub image_generation_url: String,

    #[arg(
        long = "transcription-url",
        env = "TRANSCRIPTION_API_URL",
        help = "Base URL of the speech-to-text API",
        default_value = "http://127.0.0.1:8080"
    )]
    pub transcription_url: String,

    #[arg(
        long = "transcription-model",
        env = "TRANSCRIPTION_MODEL",
        default_value = "medium"
    )]
    pub transcription_model: String,

    #[arg(
        long = "transcription-language",
        env = "TRANSCRIPTION_LANGUAGE",
        default_value = "en"
    )]
    pub transcription_language: String,

    #[arg(
        long = "transcription-task",
        env = "TRANSCRIPTION_TASK",
        value_enum,
        default_value = "translate"
    )]
    pub transcription_task: TranscriptionTask,

    #[arg(
        long = "ollama-url",
        env = "OLLAMA_URL",
        help = "Base URL of the Ollama API",
        default_value = "http://127.0.0.1:11434"
    )]
    pub ollama_url: String,

    #[arg(
        long = "ollama-model",
        env = "OLLAMA_MODEL",
        default_value = "llama3.1:8b"
    )]
    pub ollama_model: String,

    #[arg(
        long = "audio-recordings-path",
        env = "AUDIO_RECORDINGS_PATH",
        help = "Directory the submitted source files are resolved against",
        default_value = "./recordings"
    )]
    pub audio_recordings_path: PathBuf,

    #[arg(
        long = "image-generations-path",
        env = "IMAGE_GENERATIONS_PATH",
        help = "Directory generated images are written to",
        default_value = "./generations"
    )]
    pub image_generations_path: PathBuf,

    #[arg(
        long = "prompt-suffix",
        env = "PROMPT_SUFFIX",
        help = "Text appended to every prompt before image generation",
        default_value = ""
    )]
    pub prompt_suffix: String,

    #[arg(
        long = "styles",
        env = "IMAGE_STYLES",
        value_delimiter = ',',
        default_value = "Mk Gyotaku,Mk Luminogram"
    )]
    pub styles: Vec<String>,

    #[arg(long = "negative-prompt", env = "NEGATIVE_PROMPT", default_value = "")]
    pub negative_prompt: String,

    #[arg(long = "aspect-ratio", env = "ASPECT_RATIO", default_value = "1024*1024")]
    pub aspect_ratio: String,

    #[arg(
        long = "performance",
        env = "PERFORMANCE_SELECTION",
        default_value = "Extreme Speed"
    )]
    pub performance: String,

    #[arg(
        long = "advanced-params",
        env = "IMAGE_ADVANCED_PARAMS",
        help = "JSON object forwarded as advanced_params to the image service"
    )]
    pub advanced_params: Option<String>,

    #[arg(long = "seconds-per-prompt", default_value = "5")]
    pub seconds_per_prompt: f64,

    #[arg(
        long = "max-prompts",
        env = "MAX_PROMPTS",
        help = "Upper bound on prompts per recording; unbounded when unset"
    )]
    pub max_prompts: Option<u32>,

    #[arg(long = "recording-queue-capacity", default_value = "1000")]
    pub recording_queue_capacity: usize,

    #[arg(long = "image-queue-capacity", default_value = "1000")]
    pub image_queue_capacity: usize,

    #[arg(
        long = "prompt-attempts",
        help = "Attempts at getting well-formed prompts from the text model",
        default_value = "4"
    )]
    pub prompt_attempts: u32,

    #[arg(long = "image-attempts", default_value = "3")]
    pub image_attempts: u32,

    #[arg(long = "image-retry-delay-ms", default_value = "5000")]
    pub image_retry_delay_ms: u64,

    #[arg(
        long = "http-timeout-secs",
        env = "HTTP_TIMEOUT_SECS",
        help = "Per-request timeout for outbound calls",
        default_value = "600"
    )]
    pub http_timeout_secs: u64,

    #[arg(
        long = "jaeger-endpoint",
        env = "JAEGER_ENDPOINT",
        help = "Jaeger collector endpoint, e.g. http://jaeger:14268/api/traces"
    )]
    pub jaeger_endpoint: Option<String>,
}

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Config {
    /// Checks the values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.seconds_per_prompt.is_finite() && self.seconds_per_prompt > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "seconds-per-prompt",
                message: "must be a positive number".to_string(),
            });
        }
        if self.max_prompts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max-prompts",
                message: "must be at least 1".to_string(),
            });
        }
        if self.prompt_attempts == 0 || self.image_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "attempts",
                message: "retry budgets must allow at least one attempt".to_string(),
            });
        }
        if self.recording_queue_capacity == 0 || self.image_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue-capacity",
                message: "must be at least 1".to_string(),
            });
        }
        self.advanced_params()?;
        Ok(())
    }

    /// Parsed `advanced_params`, if any were configured.
    pub fn advanced_params(&self) -> Result<Option<serde_json::Value>, ConfigError> {
        let Some(raw) = self.advanced_params.as_deref() else {
            return Ok(None);
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) if value.is_object() => Ok(Some(value)),
            Ok(_) => Err(ConfigError::InvalidValue {
                key: "advanced-params",
                message: "must be a JSON object".to_string(),
            }),
            Err(err) => Err(ConfigError::InvalidValue {
                key: "advanced-params",
                message: err.to_string(),
            }),
        }
    }

    pub fn image_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.image_attempts,
            delay: Duration::from_millis(self.image_retry_delay_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

//! Error types shared by the pipeline components.

use reqwest::StatusCode;
use thiserror::Error;

/// Why a job could not be enqueued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("queue is closed, the service is shutting down")]
    Closed,
}

/// Failure talking to one of the external HTTP services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {text}")]
    UnexpectedStatus { status: StatusCode, text: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid inline image data: {0}")]
    InvalidDataUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The text model produced something that is not a JSON array of strings.
#[derive(Error, Debug)]
pub enum MalformedOutput {
    #[error("output is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("expected a JSON array of strings, got {0}")]
    WrongShape(String),
}

#[derive(Error, Debug)]
pub enum PromptGenerationError {
    #[error("failed to parse prompts after {attempts} attempts, last error: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: MalformedOutput,
    },

    #[error("text model request failed: {0}")]
    Model(#[source] ServiceError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

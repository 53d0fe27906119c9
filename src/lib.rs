use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod http;
pub mod image;
pub mod metrics;
pub mod prompts;
pub mod queue;
pub mod reporter;
pub mod server;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod transcription;
pub mod worker;

pub use config::Config;
pub use error::{PromptGenerationError, QueueError, ServiceError};
pub use service::{Collaborators, ProcessingService, ServiceHandle};

/// Identifier of a generation record, assigned by the datastore.
pub type GenerationId = i64;

/// A recording waiting for transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub recording_id: String,
    pub source_file: String,
}

/// One prompt waiting to be rendered into an image.
///
/// `index` is the prompt's position in the generated list and doubles as the
/// job's priority in the image queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub index: u32,
    pub recording_id: String,
    pub prompt: String,
    pub generation_id: GenerationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

//! The processing service: both queues, both workers, and their lifecycle.

use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::config::Config;
use crate::error::{ConfigError, QueueError};
use crate::http;
use crate::image::{FooocusClient, ImageGenerator};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::prompts::{OllamaClient, TextModel};
use crate::queue::{FifoQueue, PriorityQueue};
use crate::reporter::{DataStoreClient, Reporter};
use crate::storage::ImageStore;
use crate::transcription::{Transcriber, WhisperClient};
use crate::worker::{ImageStage, RecordingStage};
use crate::{ImageJob, ProcessingJob};

/// The external services the workers talk to.
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub text_model: Arc<dyn TextModel>,
    pub image_generator: Arc<dyn ImageGenerator>,
    pub reporter: Arc<dyn Reporter>,
}

impl Collaborators {
    /// HTTP-backed collaborators sharing one connection pool.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = http::client(config.http_timeout())?;
        Ok(Self {
            transcriber: Arc::new(WhisperClient::new(config, client.clone())),
            text_model: Arc::new(OllamaClient::new(config, client.clone())),
            image_generator: Arc::new(FooocusClient::new(config, client.clone())?),
            reporter: Arc::new(DataStoreClient::new(config, client)),
        })
    }
}

/// Cheap, cloneable access to a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    recordings: FifoQueue<ProcessingJob>,
    images: Arc<PriorityQueue<ImageJob>>,
    metrics: Arc<Metrics>,
    running: CancellationToken,
}

impl ServiceHandle {
    /// Queues a recording for processing without waiting.
    ///
    /// Fails with [`QueueError::Full`] when the queue is at capacity and with
    /// [`QueueError::Closed`] once the service is stopping.
    pub fn submit(
        &self,
        recording_id: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Result<(), QueueError> {
        if self.running.is_cancelled() {
            return Err(QueueError::Closed);
        }
        self.recordings.try_push(ProcessingJob {
            recording_id: recording_id.into(),
            source_file: source_file.into(),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recordings: self.metrics.recordings.snapshot(),
            images: self.metrics.images.snapshot(),
            recording_queue_depth: self.recordings.len(),
            image_queue_depth: self.images.len(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }
}

pub struct ProcessingService {
    handle: ServiceHandle,
    recording_worker: JoinHandle<()>,
    image_worker: JoinHandle<()>,
}

impl ProcessingService {
    /// Spawns both workers on the current Tokio runtime.
    ///
    /// The configuration is validated first; queue capacities of zero and the
    /// other values [`Config::validate`] rejects never reach the workers.
    pub fn start(
        config: &Config,
        collaborators: Collaborators,
        store: ImageStore,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!("Starting processing service");
        let metrics = Arc::new(Metrics::default());
        let recordings = FifoQueue::bounded(config.recording_queue_capacity);
        let images = Arc::new(PriorityQueue::bounded(config.image_queue_capacity));
        let running = CancellationToken::new();

        let recording_stage = RecordingStage::new(
            config,
            &collaborators,
            Arc::clone(&images),
            Arc::clone(&metrics),
        );
        let image_stage = ImageStage::new(config, &collaborators, store, Arc::clone(&metrics));

        let recording_worker = tokio::spawn(
            recording_stage
                .run(running.clone(), recordings.clone())
                .instrument(info_span!("recording_worker")),
        );
        let image_worker = tokio::spawn(
            image_stage
                .run(Arc::clone(&images))
                .instrument(info_span!("image_worker")),
        );

        Ok(Self {
            handle: ServiceHandle {
                recordings,
                images,
                metrics,
                running,
            },
            recording_worker,
            image_worker,
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    /// Stops both workers in order and waits for them.
    ///
    /// New submissions are refused and the recording worker exits after its
    /// current job. Only then is the image queue told to shut down, so every
    /// image job queued by a finished recording is still processed.
    pub async fn stop(self) -> Result<(), JoinError> {
        info!("Stopping processing service");
        self.handle.running.cancel();
        self.handle.recordings.close();
        let recordings = self.recording_worker.await;

        self.handle.images.shutdown();
        let images = self.image_worker.await;

        recordings?;
        images?;
        info!("Processing service stopped.");
        Ok(())
    }
}

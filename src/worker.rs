use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Error};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::config::{Config, RetryPolicy};
use crate::image::ImageGenerator;
use crate::metrics::Metrics;
use crate::prompts::PromptGenerator;
use crate::queue::{FifoQueue, PriorityQueue, QueueEntry};
use crate::reporter::{GenerationUpdate, Reporter};
use crate::service::Collaborators;
use crate::storage::ImageStore;
use crate::transcription::{self, Transcriber};
use crate::{GenerationStatus, ImageJob, ProcessingJob};

/// Number of prompts to request for a recording of the given length.
///
/// One prompt per `seconds_per_prompt` of audio, rounded up, at least one.
/// `max_prompts` caps the result when set.
pub fn prompt_count(duration: Duration, seconds_per_prompt: f64, max_prompts: Option<u32>) -> u32 {
    let count = ((duration.as_secs_f64() / seconds_per_prompt).ceil() as u32).max(1);
    match max_prompts {
        Some(max) => count.min(max.max(1)),
        None => count,
    }
}

/// First stage: transcribe a recording, derive prompts, queue image jobs.
pub struct RecordingStage {
    transcriber: Arc<dyn Transcriber>,
    prompts: PromptGenerator,
    reporter: Arc<dyn Reporter>,
    image_queue: Arc<PriorityQueue<ImageJob>>,
    metrics: Arc<Metrics>,
    audio_root: PathBuf,
    text_model: String,
    seconds_per_prompt: f64,
    max_prompts: Option<u32>,
}

impl RecordingStage {
    pub fn new(
        config: &Config,
        collaborators: &Collaborators,
        image_queue: Arc<PriorityQueue<ImageJob>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transcriber: Arc::clone(&collaborators.transcriber),
            prompts: PromptGenerator::new(
                Arc::clone(&collaborators.text_model),
                config.prompt_attempts,
            ),
            reporter: Arc::clone(&collaborators.reporter),
            image_queue,
            metrics,
            audio_root: config.audio_recordings_path.clone(),
            text_model: config.ollama_model.clone(),
            seconds_per_prompt: config.seconds_per_prompt,
            max_prompts: config.max_prompts,
        }
    }

    /// Processes recordings until cancelled or the queue is closed.
    ///
    /// Cancellation is checked before every dequeue and wins over queued
    /// recordings; the job in flight always runs to completion.
    pub async fn run(self, cancel_token: CancellationToken, queue: FifoQueue<ProcessingJob>) {
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!("Recording worker cancelled");
                    break;
                },
                job = queue.pop() => {
                    match job {
                        None => {
                            debug!("Recording queue closed, exiting");
                            break;
                        },
                        Some(job) => self.handle(job).await,
                    }
                }
            }
        }
        let abandoned = queue.len();
        if abandoned > 0 {
            warn!(abandoned, "Recording worker stopped with recordings still queued");
        }
        info!("Recording worker stopped.");
    }

    async fn handle(&self, job: ProcessingJob) {
        let started = Instant::now();
        let span = info_span!("recording", recording_id = %job.recording_id);
        let outcome = AssertUnwindSafe(self.process(&job).instrument(span))
            .catch_unwind()
            .await;

        let succeeded = match outcome {
            Ok(Ok(images)) => {
                info!(recording_id = %job.recording_id, images, "Recording processed");
                true
            }
            Ok(Err(err)) => {
                error!(recording_id = %job.recording_id, error = ?err, "Failed to process recording");
                false
            }
            Err(_) => {
                error!(recording_id = %job.recording_id, "Panic while processing recording");
                false
            }
        };
        self.metrics.recordings.record(started.elapsed(), succeeded);
    }

    /// Runs one recording through transcription and prompt generation and
    /// queues its image jobs. Returns the number of jobs queued.
    pub async fn process(&self, job: &ProcessingJob) -> Result<usize, Error> {
        let source = self.audio_root.join(&job.source_file);
        info!(source = %source.display(), "Starting transcription");

        let probe_path = source.clone();
        let probed =
            match tokio::task::spawn_blocking(move || transcription::audio_duration(&probe_path))
                .await
            {
                Ok(Ok(duration)) => duration,
                Ok(Err(err)) => {
                    warn!(source = %source.display(), error = %err, "Could not read audio duration, using 0");
                    Duration::ZERO
                }
                Err(err) => {
                    warn!(source = %source.display(), error = %err, "Duration probe did not finish, using 0");
                    Duration::ZERO
                }
            };

        let transcription = self
            .transcriber
            .transcribe(&source)
            .await
            .context("transcription failed")?;
        self.reporter
            .update_transcription(&job.recording_id, &transcription.text)
            .await
            .context("failed to report transcription")?;

        let duration = if probed.is_zero() {
            transcription.duration
        } else {
            probed
        };
        let count = prompt_count(duration, self.seconds_per_prompt, self.max_prompts);
        info!(duration = ?duration, count, "Generating image prompts");

        let prompts = self
            .prompts
            .generate(&transcription.text, &self.text_model, count)
            .await
            .context("prompt generation failed")?;
        self.reporter
            .update_prompts(&job.recording_id, &prompts)
            .await
            .context("failed to report prompts")?;

        if prompts.is_empty() {
            warn!("Text model returned no prompts, nothing to generate");
            return Ok(0);
        }

        let generation_ids = self
            .reporter
            .create_image_generations(&job.recording_id, &prompts)
            .await
            .context("failed to create generation records")?;
        if generation_ids.len() != prompts.len() {
            bail!(
                "datastore created {} generation records for {} prompts",
                generation_ids.len(),
                prompts.len()
            );
        }

        let queued = prompts.len();
        for (index, (generation_id, prompt)) in generation_ids.into_iter().zip(prompts).enumerate() {
            let index = u32::try_from(index).context("too many prompts")?;
            debug!(index, generation_id, "Queueing image job");
            self.image_queue
                .push(
                    index,
                    ImageJob {
                        index,
                        recording_id: job.recording_id.clone(),
                        prompt,
                        generation_id,
                    },
                )
                .await;
        }
        Ok(queued)
    }
}

/// Second stage: turn one prompt into a stored image and report the outcome.
pub struct ImageStage {
    generator: Arc<dyn ImageGenerator>,
    reporter: Arc<dyn Reporter>,
    store: ImageStore,
    metrics: Arc<Metrics>,
    styles: Vec<String>,
    prompt_suffix: String,
    retry: RetryPolicy,
}

impl ImageStage {
    pub fn new(
        config: &Config,
        collaborators: &Collaborators,
        store: ImageStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            generator: Arc::clone(&collaborators.image_generator),
            reporter: Arc::clone(&collaborators.reporter),
            store,
            metrics,
            styles: config.styles.clone(),
            prompt_suffix: config.prompt_suffix.clone(),
            retry: config.image_retry(),
        }
    }

    /// Processes image jobs in priority order until the shutdown marker.
    pub async fn run(self, queue: Arc<PriorityQueue<ImageJob>>) {
        loop {
            match queue.pop().await {
                QueueEntry::Shutdown => {
                    debug!("Received shutdown, stopping image worker");
                    break;
                }
                QueueEntry::Work { payload, .. } => self.handle(payload).await,
            }
        }
        info!("Image worker stopped.");
    }

    async fn handle(&self, job: ImageJob) {
        let started = Instant::now();
        let span = info_span!(
            "image",
            recording_id = %job.recording_id,
            index = job.index,
            generation_id = job.generation_id
        );
        let outcome = AssertUnwindSafe(self.process(&job).instrument(span.clone()))
            .catch_unwind()
            .await;

        let completed = match outcome {
            Ok(completed) => completed,
            Err(_) => {
                error!(parent: &span, "Panic while generating image");
                self.report_final(&job, &GenerationUpdate::failed("image worker panicked"))
                    .await;
                false
            }
        };
        self.metrics.images.record(started.elapsed(), completed);
    }

    /// Generates and stores the image for `job`, retrying with a fixed delay,
    /// and reports the terminal status. Returns whether it completed and the
    /// datastore accepted the result.
    pub async fn process(&self, job: &ImageJob) -> bool {
        self.report(job, &GenerationUpdate::status(GenerationStatus::Generating))
            .await;

        let mut attempt = 0;
        let update = loop {
            attempt += 1;
            match self.attempt(job).await {
                Ok(update) => break update,
                Err(err) if attempt >= self.retry.max_attempts => {
                    error!(attempt, error = ?err, "Image generation failed, giving up");
                    break GenerationUpdate::failed(failure_reason(&err));
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %format!("{err:#}"),
                        "Image generation attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        };

        let completed = update.status == Some(GenerationStatus::Completed);
        let reported = self.report_final(job, &update).await;
        completed && reported
    }

    async fn attempt(&self, job: &ImageJob) -> Result<GenerationUpdate, Error> {
        let prompt = format!("{}{}", job.prompt, self.prompt_suffix);
        let result = self
            .generator
            .generate(&prompt, &self.styles)
            .await
            .context("image generation failed")?;

        let style = self.styles.first().map(String::as_str).unwrap_or("default");
        let file_name = self
            .store
            .store(job, style, &result.image_data)
            .await
            .context("failed to store image")?;
        info!(file_name = %file_name, source = %result.source, "Image stored");

        Ok(GenerationUpdate {
            image_file_path: Some(file_name),
            seed: Some(result.seed),
            request_payload: Some(result.request_payload),
            status: Some(GenerationStatus::Completed),
            reason: None,
            duration: Some(result.duration.as_secs_f64()),
        })
    }

    /// Sends a terminal update under the same retry policy as generation, so a
    /// transient datastore error does not leave the record at `generating`.
    async fn report_final(&self, job: &ImageJob, update: &GenerationUpdate) -> bool {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .reporter
                .update_image_generation(&job.recording_id, job.generation_id, update)
                .await;
            match result {
                Ok(()) => return true,
                Err(err) if attempt >= self.retry.max_attempts => {
                    error!(
                        attempt,
                        generation_id = job.generation_id,
                        status = ?update.status,
                        error = %err,
                        "Failed to report final image generation status, giving up"
                    );
                    return false;
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        generation_id = job.generation_id,
                        error = %err,
                        "Failed to report final image generation status, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    async fn report(&self, job: &ImageJob, update: &GenerationUpdate) {
        if let Err(err) = self
            .reporter
            .update_image_generation(&job.recording_id, job.generation_id, update)
            .await
        {
            error!(
                recording_id = %job.recording_id,
                generation_id = job.generation_id,
                status = ?update.status,
                error = %err,
                "Failed to report image generation status"
            );
        }
    }
}

fn failure_reason(err: &Error) -> String {
    let reason = format!("{err:#}");
    if reason.trim().is_empty() {
        "unknown error".to_string()
    } else {
        reason
    }
}

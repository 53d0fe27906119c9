#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tokio::sync::Notify;

use audioprompt::image::{ImageGenerationResult, ImageGenerator};
use audioprompt::prompts::TextModel;
use audioprompt::reporter::{GenerationUpdate, Reporter};
use audioprompt::transcription::{Transcriber, Transcription};
use audioprompt::{Collaborators, Config, GenerationId, ServiceError};

pub fn config(args: &[&str]) -> Config {
    let mut argv = vec!["audioprompt"];
    argv.extend_from_slice(args);
    Config::try_parse_from(argv).unwrap()
}

pub fn write_wav(path: &Path, seconds: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..seconds * spec.sample_rate {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Lets a test hold a fake in the middle of a call.
#[derive(Default)]
pub struct Gate {
    pub started: Notify,
    pub release: Notify,
}

pub struct FakeTranscriber {
    pub text: String,
    pub duration: Duration,
    pub gate: Option<Arc<Gate>>,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl FakeTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            duration: Duration::ZERO,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcription, ServiceError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if path.to_string_lossy().contains("panic") {
            panic!("transcriber crashed on {}", path.display());
        }
        if path.to_string_lossy().contains("broken") {
            return Err(ServiceError::InvalidResponse("cannot decode audio".into()));
        }
        Ok(Transcription {
            text: self.text.clone(),
            duration: self.duration,
        })
    }
}

/// Answers "Generate N image prompts ..." with N numbered prompts.
#[derive(Default)]
pub struct CountingTextModel;

#[async_trait]
impl TextModel for CountingTextModel {
    async fn generate(&self, _model: &str, prompt: &str) -> Result<String, ServiceError> {
        let count: usize = prompt
            .strip_prefix("Generate ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ServiceError::InvalidResponse(format!("odd prompt: {prompt}")))?;
        let prompts: Vec<String> = (0..count).map(|i| format!("prompt {i}")).collect();
        Ok(serde_json::to_string(&prompts).unwrap())
    }
}

pub struct FakeImageGenerator {
    failures_left: AtomicU32,
    pub data: Vec<u8>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeImageGenerator {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Fails the first `failures` calls, then succeeds.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            data: b"fake png".to_vec(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        styles: &[String],
    ) -> Result<ImageGenerationResult, ServiceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("panic") {
            panic!("image generator crashed on {prompt:?}");
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::InvalidResponse("service unavailable".into()));
        }
        Ok(ImageGenerationResult {
            source: "fake".to_string(),
            seed: 7,
            request_payload: json!({ "prompt": prompt, "style_selections": styles }),
            duration: Duration::from_millis(3),
            image_data: self.data.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Transcription(String, String),
    Prompts(String, Vec<String>),
    Created(String, Vec<String>),
    Updated(String, GenerationId, GenerationUpdate),
}

/// Records every report and hands out generation ids starting at 100.
///
/// Generation updates can be made to fail by their 1-based call number;
/// failed updates are not recorded.
pub struct RecordingReporter {
    next_id: AtomicI64,
    update_calls: AtomicUsize,
    failing_updates: Mutex<Vec<usize>>,
    pub events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            update_calls: AtomicUsize::new(0),
            failing_updates: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_updates(&self, calls: &[usize]) {
        self.failing_updates.lock().unwrap().extend_from_slice(calls);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn updates_for(&self, generation_id: GenerationId) -> Vec<GenerationUpdate> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Updated(_, id, update) if id == generation_id => Some(update),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn update_transcription(
        &self,
        recording_id: &str,
        transcription: &str,
    ) -> Result<(), ServiceError> {
        self.events.lock().unwrap().push(Event::Transcription(
            recording_id.to_string(),
            transcription.to_string(),
        ));
        Ok(())
    }

    async fn update_prompts(
        &self,
        recording_id: &str,
        prompts: &[String],
    ) -> Result<(), ServiceError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Prompts(recording_id.to_string(), prompts.to_vec()));
        Ok(())
    }

    async fn create_image_generations(
        &self,
        recording_id: &str,
        prompts: &[String],
    ) -> Result<Vec<GenerationId>, ServiceError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Created(recording_id.to_string(), prompts.to_vec()));
        Ok(prompts
            .iter()
            .map(|_| self.next_id.fetch_add(1, Ordering::SeqCst))
            .collect())
    }

    async fn update_image_generation(
        &self,
        recording_id: &str,
        generation_id: GenerationId,
        update: &GenerationUpdate,
    ) -> Result<(), ServiceError> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_updates.lock().unwrap().contains(&call) {
            return Err(ServiceError::InvalidResponse("datastore unavailable".into()));
        }
        self.events.lock().unwrap().push(Event::Updated(
            recording_id.to_string(),
            generation_id,
            update.clone(),
        ));
        Ok(())
    }
}

pub struct Fakes {
    pub transcriber: Arc<FakeTranscriber>,
    pub images: Arc<FakeImageGenerator>,
    pub reporter: Arc<RecordingReporter>,
}

impl Fakes {
    pub fn new(transcriber: FakeTranscriber, images: FakeImageGenerator) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            images: Arc::new(images),
            reporter: Arc::new(RecordingReporter::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transcriber: self.transcriber.clone(),
            text_model: Arc::new(CountingTextModel),
            image_generator: self.images.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

//! The HTTP collaborators against a fake upstream serving every external API.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use audioprompt::reporter::{DataStoreClient, GenerationUpdate, Reporter};
use audioprompt::storage::ImageStore;
use audioprompt::{http, Collaborators, GenerationStatus, ProcessingService, ServiceError};

use common::*;

#[derive(Clone)]
struct Upstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Upstream {
    fn record(&self, path: &str, body: Value) {
        self.requests.lock().unwrap().push((path.to_string(), body));
    }

    fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen, _)| seen == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

async fn transcribe(State(upstream): State<Upstream>, uri: Uri, headers: HeaderMap) -> Json<Value> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    upstream.record(uri.path(), json!({ "content_type": content_type }));
    Json(json!({ "text": "  a lighthouse in a storm\n", "duration": 7.5 }))
}

async fn generate_text(State(upstream): State<Upstream>, Json(body): Json<Value>) -> Json<Value> {
    upstream.record("/api/generate", body);
    Json(json!({ "response": r#"["a lighthouse", "a storm"]"# }))
}

async fn text_to_image(State(upstream): State<Upstream>, Json(body): Json<Value>) -> Json<Value> {
    let inline = body["prompt"]
        .as_str()
        .is_some_and(|prompt| prompt.starts_with("a lighthouse"));
    upstream.record("/v1/generation/text-to-image", body);
    if inline {
        let url = format!("data:image/png;base64,{}", STANDARD.encode(b"inline png"));
        Json(json!([{ "url": url, "seed": 11 }]))
    } else {
        let url = format!("http://{}/files/storm.png", upstream.addr);
        Json(json!([{ "url": url, "seed": "42" }]))
    }
}

async fn file() -> &'static [u8] {
    b"fetched png"
}

async fn update(State(upstream): State<Upstream>, uri: Uri, Json(body): Json<Value>) -> StatusCode {
    upstream.record(uri.path(), body);
    StatusCode::OK
}

async fn create_batch(
    State(upstream): State<Upstream>,
    Path(recording_id): Path<String>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Json<Value> {
    let count = body["generations"].as_array().map_or(0, Vec::len);
    upstream.record(uri.path(), body);
    let created: Vec<Value> = (0..count)
        .map(|i| json!({ "id": 500 + i, "audio_recording_id": recording_id }))
        .collect();
    Json(Value::Array(created))
}

async fn spawn_upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = Upstream {
        addr: listener.local_addr().unwrap(),
        requests: Arc::default(),
    };
    let app = Router::new()
        .route("/v1/audio/translations", post(transcribe))
        .route("/v1/audio/transcriptions", post(transcribe))
        .route("/api/generate", post(generate_text))
        .route("/v1/generation/text-to-image", post(text_to_image))
        .route("/files/{name}", get(file))
        .route("/recordings/{id}/transcription", put(update))
        .route("/recordings/{id}/prompts", put(update))
        .route("/recordings/{id}/image-generations/batch", post(create_batch))
        .route("/recordings/{id}/image-generations/{generation_id}", put(update))
        .with_state(upstream.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    upstream
}

#[tokio::test]
async fn recording_flows_through_every_upstream() {
    let upstream = spawn_upstream().await;
    let url = format!("http://{}", upstream.addr);
    let audio = tempfile::tempdir().unwrap();
    let images = tempfile::tempdir().unwrap();
    write_wav(&audio.path().join("rec-1.wav"), 7);
    let config = config(&[
        "--data-store-url",
        &url,
        "--image-generation-url",
        &url,
        "--transcription-url",
        &url,
        "--ollama-url",
        &url,
        "--audio-recordings-path",
        audio.path().to_str().unwrap(),
        "--image-retry-delay-ms",
        "0",
        "--prompt-suffix",
        ", woodcut",
    ]);

    let collaborators = Collaborators::from_config(&config).unwrap();
    let service =
        ProcessingService::start(&config, collaborators, ImageStore::new(images.path()))
            .unwrap();
    let handle = service.handle();
    handle.submit("rec-1", "rec-1.wav").unwrap();
    eventually(|| handle.metrics().images.processed == 2).await;
    service.stop().await.unwrap();

    let metrics = handle.metrics();
    assert_eq!(metrics.recordings.failed, 0);
    assert_eq!(metrics.images.failed, 0);

    let uploads = upstream.bodies("/v1/audio/translations");
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0]["content_type"]
        .as_str()
        .unwrap()
        .starts_with("multipart/form-data"));

    assert_eq!(
        upstream.bodies("/recordings/rec-1/transcription"),
        vec![json!({ "transcription": "a lighthouse in a storm" })]
    );

    let generate = upstream.bodies("/api/generate");
    assert_eq!(generate[0]["model"], "llama3.1:8b");
    assert_eq!(generate[0]["stream"], false);
    assert!(generate[0]["prompt"]
        .as_str()
        .unwrap()
        .starts_with("Generate 2 image prompts"));

    assert_eq!(
        upstream.bodies("/recordings/rec-1/prompts"),
        vec![json!({ "prompts": ["a lighthouse", "a storm"] })]
    );
    assert_eq!(
        upstream.bodies("/recordings/rec-1/image-generations/batch"),
        vec![json!({ "generations": [
            { "audio_recording_id": "rec-1", "prompt": "a lighthouse", "status": "pending" },
            { "audio_recording_id": "rec-1", "prompt": "a storm", "status": "pending" },
        ]})]
    );

    let requests = upstream.bodies("/v1/generation/text-to-image");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["prompt"], "a lighthouse, woodcut");
    assert_eq!(
        requests[0]["style_selections"],
        json!(["Mk Gyotaku", "Mk Luminogram"])
    );
    assert_eq!(requests[0]["aspect_ratios_selection"], "1024*1024");
    assert_eq!(requests[0]["performance_selection"], "Extreme Speed");

    for (generation_id, seed, bytes) in [
        (500, 11, b"inline png".as_slice()),
        (501, 42, b"fetched png".as_slice()),
    ] {
        let updates = upstream.bodies(&format!(
            "/recordings/rec-1/image-generations/{generation_id}"
        ));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], json!({ "status": "generating" }));
        let done = &updates[1];
        assert_eq!(done["status"], "completed");
        assert_eq!(done["seed"], seed);
        assert!(done.get("reason").is_none());
        let file_name = done["image_file_path"].as_str().unwrap();
        assert!(file_name.starts_with(&format!("rec-1_{}_{generation_id}_Mk-Gyotaku_", generation_id - 500)));
        assert!(file_name.ends_with(".png"));
        assert_eq!(std::fs::read(images.path().join(file_name)).unwrap(), bytes);
    }
}

#[tokio::test]
async fn datastore_errors_carry_status_and_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/recordings/{id}/image-generations/{generation_id}",
        put(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = config(&["--data-store-url", &format!("http://{addr}")]);
    let client = DataStoreClient::new(&config, http::client(config.http_timeout()).unwrap());
    let err = client
        .update_image_generation("r1", 7, &GenerationUpdate::status(GenerationStatus::Generating))
        .await
        .unwrap_err();

    match err {
        ServiceError::UnexpectedStatus { status, text } => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(text, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

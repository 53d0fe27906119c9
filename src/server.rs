use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::error::QueueError;
use crate::metrics::MetricsSnapshot;
use crate::service::ServiceHandle;
use crate::ProcessingJob;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Accepted {
    pub status: &'static str,
    pub recording_id: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Bad Request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        warn!(status = %status, error = %self, "Rejected processing request");
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(handle: ServiceHandle) -> Router {
    Router::new()
        .route("/process-audio/", post(process_audio))
        .route("/metrics", get(metrics))
        .with_state(handle)
}

async fn process_audio(
    State(handle): State<ServiceHandle>,
    payload: Result<Json<ProcessingJob>, JsonRejection>,
) -> Result<Json<Accepted>, ApiError> {
    let Json(request) = payload?;
    info!(recording_id = %request.recording_id, "Received processing request");
    if request.recording_id.trim().is_empty() {
        return Err(ApiError::BadRequest("recording_id cannot be empty".to_string()));
    }
    if request.source_file.trim().is_empty() {
        return Err(ApiError::BadRequest("source_file cannot be empty".to_string()));
    }

    let recording_id = request.recording_id.clone();
    handle.submit(request.recording_id, request.source_file)?;
    info!(recording_id = %recording_id, "Added recording to processing queue");

    Ok(Json(Accepted {
        status: "processing",
        recording_id,
    }))
}

async fn metrics(State(handle): State<ServiceHandle>) -> Json<MetricsSnapshot> {
    Json(handle.metrics())
}

/// Serves the processing API until `cancel_token` is cancelled.
pub async fn serve(
    cancel_token: CancellationToken,
    listen_addr: SocketAddr,
    handle: ServiceHandle,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            debug!("Server Cancelled");
        })
        .await?;

    info!("Server stopped.");
    Ok(())
}

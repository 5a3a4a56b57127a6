//! Endpoints other nodes call while syncing from this one.

use super::state::{GuardedJobManager, GuardedTrackIndex, ServerState};
use crate::archive_jobs::ArchiveJobStatus;
use crate::library::{Manifest, ManifestTrack};
use crate::sync::CreatedJob;
use crate::throttle::ThrottledStream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct CreateJobBody {
    files: Option<Vec<String>>,
}

async fn get_manifest(State(track_index): State<GuardedTrackIndex>) -> Response {
    match track_index.list_verified() {
        Ok(tracks) => Json(Manifest {
            tracks: tracks.into_iter().map(ManifestTrack::from).collect(),
        })
        .into_response(),
        Err(err) => {
            error!("Failed to build manifest: {:#}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn create_job(
    State(job_manager): State<GuardedJobManager>,
    Json(body): Json<CreateJobBody>,
) -> Response {
    let Some(files) = body.files else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "files is required" })),
        )
            .into_response();
    };

    let job = job_manager.create_job(files);
    Json(CreatedJob {
        job_id: job.id,
        status: job.status,
    })
    .into_response()
}

async fn get_job(State(job_manager): State<GuardedJobManager>, Path(id): Path<String>) -> Response {
    match job_manager.get_job(&id) {
        Some(job) => Json(job).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "error" }))).into_response(),
    }
}

async fn download_archive(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    let job = match state.job_manager.get_job(&id) {
        Some(job) if job.status == ArchiveJobStatus::Ready => job,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    let file = match File::open(&job.path).await {
        Ok(file) => file,
        Err(err) => {
            debug!("Archive for job {} unavailable: {}", id, err);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let length = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let stream = ThrottledStream::new(
        ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE),
        state.config.download_bytes_per_second,
    );
    let filename = format!(
        "mrepo_archive_{}.zip",
        chrono::Utc::now().timestamp_millis()
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .header(header::CONTENT_LENGTH, length)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn make_peer_routes(state: ServerState) -> Router {
    Router::new()
        .route("/api/manifest", get(get_manifest))
        .route("/api/job", post(create_job))
        .route("/api/job/{id}", get(get_job))
        .route("/download/{id}", get(download_archive))
        .with_state(state)
}

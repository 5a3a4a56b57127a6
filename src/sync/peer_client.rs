//! HTTP client for another node's peer API.

use crate::archive_jobs::ArchiveJobStatus;
use crate::library::Manifest;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Request to peer failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Peer answered {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedJob {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: ArchiveJobStatus,
}

#[derive(Deserialize)]
struct JobStatusBody {
    status: ArchiveJobStatus,
}

#[derive(Serialize)]
struct CreateJobBody<'a> {
    files: &'a [String],
}

/// Calls a sync needs to make against one peer.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Manifest, PeerError>;

    async fn create_job(&self, files: &[String]) -> Result<CreatedJob, PeerError>;

    /// Unknown job ids are reported as [`ArchiveJobStatus::Error`].
    async fn job_status(&self, job_id: &str) -> Result<ArchiveJobStatus, PeerError>;

    /// Streams the job's archive into `dest`, returning the bytes written.
    async fn download_archive(&self, job_id: &str, dest: &Path) -> Result<u64, PeerError>;
}

/// Builds a [`PeerClient`] for a remote's base url.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> Result<Box<dyn PeerClient>, PeerError>;
}

pub struct HttpPeerClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpPeerClient {
    /// `request_timeout` bounds the JSON calls. Archive downloads are only
    /// bounded by the connect timeout since the peer may throttle them.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check_status(url: &str, response: &reqwest::Response) -> Result<(), PeerError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PeerError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_manifest(&self) -> Result<Manifest, PeerError> {
        let url = self.url("/api/manifest");
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::check_status(&url, &response)?;
        Ok(response.json().await?)
    }

    async fn create_job(&self, files: &[String]) -> Result<CreatedJob, PeerError> {
        let url = self.url("/api/job");
        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&CreateJobBody { files })
            .send()
            .await?;
        Self::check_status(&url, &response)?;
        Ok(response.json().await?)
    }

    async fn job_status(&self, job_id: &str) -> Result<ArchiveJobStatus, PeerError> {
        let url = self.url(&format!("/api/job/{}", job_id));
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ArchiveJobStatus::Error);
        }
        Self::check_status(&url, &response)?;
        let body: JobStatusBody = response.json().await?;
        Ok(body.status)
    }

    async fn download_archive(&self, job_id: &str, dest: &Path) -> Result<u64, PeerError> {
        let url = self.url(&format!("/download/{}", job_id));
        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(PeerError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

pub struct HttpPeerConnector {
    request_timeout: Duration,
}

impl HttpPeerConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl PeerConnector for HttpPeerConnector {
    fn connect(&self, base_url: &str) -> Result<Box<dyn PeerClient>, PeerError> {
        Ok(Box::new(HttpPeerClient::new(base_url, self.request_timeout)?))
    }
}

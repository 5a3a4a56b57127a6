//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per node endpoint. When API routes or
//! request formats change, update only this file.

#![allow(dead_code)]

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client, optionally carrying the admin key
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    key: Option<String>,
}

impl TestClient {
    /// Creates a client without an admin key
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            key: None,
        }
    }

    /// Creates a client that sends the test admin key
    pub fn admin(base_url: String) -> Self {
        Self::with_key(base_url, ADMIN_KEY)
    }

    /// Creates a client that sends an arbitrary key
    pub fn with_key(base_url: String, key: &str) -> Self {
        let mut client = Self::new(base_url);
        client.key = Some(key.to_string());
        client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn admin_post(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(key) = &self.key {
            request = request.header("x-key", key);
        }
        request
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn home(&self) -> Response {
        self.client
            .get(self.url("/"))
            .send()
            .await
            .expect("Home request failed")
    }

    // ========================================================================
    // Peer Endpoints
    // ========================================================================

    pub async fn manifest(&self) -> Response {
        self.client
            .get(self.url("/api/manifest"))
            .send()
            .await
            .expect("Manifest request failed")
    }

    pub async fn create_job(&self, files: &[&str]) -> Response {
        self.client
            .post(self.url("/api/job"))
            .json(&json!({ "files": files }))
            .send()
            .await
            .expect("Create job request failed")
    }

    pub async fn create_job_raw(&self, body: Value) -> Response {
        self.client
            .post(self.url("/api/job"))
            .json(&body)
            .send()
            .await
            .expect("Create job request failed")
    }

    pub async fn job_status(&self, id: &str) -> Response {
        self.client
            .get(self.url(&format!("/api/job/{}", id)))
            .send()
            .await
            .expect("Job status request failed")
    }

    /// Polls a job until it leaves `processing`, returning its final JSON.
    pub async fn wait_for_job(&self, id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self
                .job_status(id)
                .await
                .json()
                .await
                .expect("Job status is not JSON");
            if body["status"] != "processing" {
                return body;
            }
            if start.elapsed() > Duration::from_millis(EVENTUALLY_TIMEOUT_MS) {
                panic!("Job {} still processing", id);
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    pub async fn download(&self, id: &str) -> Response {
        self.client
            .get(self.url(&format!("/download/{}", id)))
            .send()
            .await
            .expect("Download request failed")
    }

    pub async fn stream(&self, file: &str, range: Option<&str>) -> Response {
        let mut request = self.client.get(self.url("/stream")).query(&[("file", file)]);
        if let Some(range) = range {
            request = request.header("range", range);
        }
        request.send().await.expect("Stream request failed")
    }

    // ========================================================================
    // Admin Endpoints
    // ========================================================================

    pub async fn list_remotes(&self) -> Response {
        let mut request = self.client.get(self.url("/api/admin/list"));
        if let Some(key) = &self.key {
            request = request.header("x-key", key);
        }
        request.send().await.expect("List remotes request failed")
    }

    pub async fn add_remote(&self, name: &str, url: &str) -> Response {
        self.admin_post("/api/admin/add", json!({ "name": name, "url": url }))
            .send()
            .await
            .expect("Add remote request failed")
    }

    pub async fn delete_remote(&self, name: &str) -> Response {
        self.admin_post("/api/admin/del", json!({ "name": name }))
            .send()
            .await
            .expect("Delete remote request failed")
    }

    pub async fn sync_remote(&self, name: &str) -> Response {
        self.admin_post("/api/admin/sync", json!({ "name": name }))
            .send()
            .await
            .expect("Sync request failed")
    }

    /// Returns the listed entry for `name`, if any.
    pub async fn remote_status(&self, name: &str) -> Option<Value> {
        let remotes: Vec<Value> = self
            .list_remotes()
            .await
            .json()
            .await
            .expect("Remote list is not JSON");
        remotes.into_iter().find(|remote| remote["name"] == name)
    }

    /// Waits until `name` is idle with a `last_sync` later than `after`.
    pub async fn wait_for_sync(&self, name: &str, after: i64) -> Value {
        let start = std::time::Instant::now();
        loop {
            if let Some(remote) = self.remote_status(name).await {
                let last_sync = remote["last_sync"].as_i64().unwrap_or(0);
                if remote["syncing"] == false && last_sync > after {
                    return remote;
                }
            }
            if start.elapsed() > Duration::from_millis(EVENTUALLY_TIMEOUT_MS) {
                panic!("Sync of {} did not complete", name);
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }
}
